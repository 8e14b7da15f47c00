use keystone::application::Application;
use keystone::runner::{ApplicationRunner, ApplicationRunnerPtr, ErrorPtr};
use keystone_di::container::RegistrationOptions;
use keystone_di::descriptor::{Buildable, Constructor, TypeDescriptor};
use keystone_di::{alias, injectable};
use std::error::Error;

// this is an application runner, which will run when the application starts; the application
// finds it by resolving all registered runners
struct HelloWorldRunner;

injectable!(HelloWorldRunner);
alias!(ApplicationRunnerPtr => HelloWorldRunner);

impl Buildable for HelloWorldRunner {
    fn descriptor() -> TypeDescriptor<Self> {
        TypeDescriptor::new().constructor(Constructor::new(vec![], |_| Ok(HelloWorldRunner)))
    }
}

impl ApplicationRunner for HelloWorldRunner {
    fn run(&self) -> Result<(), ErrorPtr> {
        println!("Hello world!");
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    // create our application with configuration taken from the environment
    let application = Application::from_environment()?;

    // runners need names, since all of them are registered for the same type
    application
        .container()
        .register_type::<ApplicationRunnerPtr, HelloWorldRunner>(RegistrationOptions::named(
            "hello",
        ))?;

    // prints "Hello world!"
    application.run()?;
    Ok(())
}
