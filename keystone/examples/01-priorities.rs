// note: this example assumes you've analyzed the previous one

use keystone::application::Application;
use keystone::runner::{ApplicationRunner, ApplicationRunnerPtr, ErrorPtr};
use keystone_di::container::RegistrationOptions;
use keystone_di::descriptor::{Buildable, Constructor, Parameter, TypeDescriptor};
use keystone_di::instance::InstancePtr;
use keystone_di::lifetime::ContainerControlledLifetimeManager;
use keystone_di::{alias, injectable};
use std::error::Error;

struct Punctuation {
    mark: char,
}

struct PrintGreetingRunner;

struct PrintMarkRunner {
    punctuation: InstancePtr<Punctuation>,
}

injectable!(Punctuation, PrintGreetingRunner, PrintMarkRunner);
alias!(ApplicationRunnerPtr => PrintGreetingRunner, PrintMarkRunner);

impl Buildable for PrintGreetingRunner {
    fn descriptor() -> TypeDescriptor<Self> {
        TypeDescriptor::new().constructor(Constructor::new(vec![], |_| Ok(PrintGreetingRunner)))
    }
}

impl Buildable for PrintMarkRunner {
    fn descriptor() -> TypeDescriptor<Self> {
        TypeDescriptor::new().constructor(Constructor::new(
            vec![Parameter::required::<Punctuation>("punctuation")],
            |arguments| {
                Ok(PrintMarkRunner {
                    punctuation: arguments.next()?,
                })
            },
        ))
    }
}

impl ApplicationRunner for PrintGreetingRunner {
    fn run(&self) -> Result<(), ErrorPtr> {
        print!("Hello world");
        Ok(())
    }

    // for ordered execution of application runners, priorities can be used
    fn priority(&self) -> i8 {
        2
    }
}

impl ApplicationRunner for PrintMarkRunner {
    fn run(&self) -> Result<(), ErrorPtr> {
        println!("{}", self.punctuation.mark);
        Ok(())
    }

    fn priority(&self) -> i8 {
        1
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let application = Application::from_environment()?;
    let container = application.container();

    container.register_instance(
        InstancePtr::new(Punctuation { mark: '!' }),
        RegistrationOptions::new(),
    )?;

    // registration order doesn't matter - priorities do
    container.register_type::<ApplicationRunnerPtr, PrintMarkRunner>(
        RegistrationOptions::named("mark"),
    )?;
    container.register_type::<ApplicationRunnerPtr, PrintGreetingRunner>(
        RegistrationOptions::named("greeting")
            .with_lifetime(ContainerControlledLifetimeManager::default()),
    )?;

    // prints "Hello world!"
    application.run()?;
    Ok(())
}
