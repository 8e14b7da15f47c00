use keystone_di::container::{Container, RegistrationOptions};
use keystone_di::descriptor::{Buildable, Constructor, TypeDescriptor};
use keystone_di::injectable;
use keystone_di::instance::{Disposable, ErrorPtr, InstancePtr};
use keystone_di::lifetime::{ContainerControlledLifetimeManager, HierarchicalLifetimeManager};
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

// a resource we want exactly one of per container in the hierarchy
struct Connection {
    id: usize,
}

injectable!(Connection);

impl Buildable for Connection {
    fn descriptor() -> TypeDescriptor<Self> {
        TypeDescriptor::new()
            .constructor(Constructor::new(vec![], |_| {
                Ok(Connection {
                    id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                })
            }))
            // instances held by lifetime managers get disposed along with their container
            .disposable()
    }
}

impl Disposable for Connection {
    fn dispose(&self) -> Result<(), ErrorPtr> {
        println!("Closing connection {}", self.id);
        Ok(())
    }
}

struct Settings {
    url: String,
}

injectable!(Settings);

fn main() -> Result<(), Box<dyn Error>> {
    let container = Container::new();

    // factories are the simplest way to build types which don't describe themselves
    container.register_factory::<Settings, _>(
        RegistrationOptions::new().with_lifetime(ContainerControlledLifetimeManager::default()),
        |_| {
            Ok(InstancePtr::new(Settings {
                url: "db://localhost".to_string(),
            }))
        },
    )?;

    // every child container gets its own connection
    container.register_self::<Connection>(
        RegistrationOptions::new().with_lifetime(HierarchicalLifetimeManager::default()),
    )?;

    let child = container.create_child_container();

    let parent_connection = container.resolve::<Connection>()?;
    let child_connection = child.resolve::<Connection>()?;
    let settings = child.resolve::<Settings>()?;

    println!(
        "Parent uses {}, child uses {}, both connect to {}",
        parent_connection.id,
        child_connection.id,
        settings.url
    );

    // disposing the parent disposes the child as well, closing both connections
    container.dispose()?;
    Ok(())
}
