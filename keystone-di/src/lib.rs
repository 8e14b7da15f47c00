//! Dependency injection resolution engine.
//!
//! Given a request for a [BuildKey](build_key::BuildKey) - a type with an optional registration
//! name - the engine builds an object graph by selecting constructors, properties and methods,
//! resolving their dependencies recursively and applying [lifetime](lifetime) policies. Building
//! is performed by a staged [strategy chain](strategy) executed over a per-resolution
//! [BuilderContext](context::BuilderContext), configured through layered
//! [policy lists](policy::PolicyList).
//!
//! Rust has no runtime reflection, so every buildable type describes itself once with a
//! [TypeDescriptor](descriptor::TypeDescriptor). [Selectors](selection) decide what to use from
//! that description, while [dependency resolvers](resolution) produce values for each parameter
//! or property.
//!
//! ```
//! use keystone_di::container::{Container, RegistrationOptions};
//! use keystone_di::descriptor::{Buildable, Constructor, Parameter, TypeDescriptor};
//! use keystone_di::instance::InstancePtr;
//! use keystone_di::lifetime::ContainerControlledLifetimeManager;
//! use keystone_di::{alias, injectable};
//!
//! trait Logger {
//!     fn log(&self, message: &str);
//! }
//!
//! struct ConsoleLogger;
//!
//! impl Logger for ConsoleLogger {
//!     fn log(&self, message: &str) {
//!         println!("{message}");
//!     }
//! }
//!
//! struct Service {
//!     logger: InstancePtr<dyn Logger + Send + Sync>,
//! }
//!
//! injectable!(dyn Logger + Send + Sync, ConsoleLogger, Service);
//! alias!(dyn Logger + Send + Sync => ConsoleLogger);
//!
//! impl Buildable for ConsoleLogger {
//!     fn descriptor() -> TypeDescriptor<Self> {
//!         TypeDescriptor::new().constructor(Constructor::new(vec![], |_| Ok(ConsoleLogger)))
//!     }
//! }
//!
//! impl Buildable for Service {
//!     fn descriptor() -> TypeDescriptor<Self> {
//!         TypeDescriptor::new().constructor(Constructor::new(
//!             vec![Parameter::required::<dyn Logger + Send + Sync>("logger")],
//!             |arguments| {
//!                 Ok(Service {
//!                     logger: arguments.next()?,
//!                 })
//!             },
//!         ))
//!     }
//! }
//!
//! let container = Container::new();
//! container
//!     .register_type::<dyn Logger + Send + Sync, ConsoleLogger>(
//!         RegistrationOptions::new().with_lifetime(ContainerControlledLifetimeManager::default()),
//!     )
//!     .unwrap();
//! container
//!     .register_self::<Service>(RegistrationOptions::new())
//!     .unwrap();
//!
//! let service = container.resolve::<Service>().unwrap();
//! service.logger.log("built");
//! ```

pub mod build_key;
pub mod container;
pub mod context;
pub mod descriptor;
mod error;
pub mod extension;
pub mod injection;
pub mod instance;
pub mod interception;
pub mod lifetime;
pub mod mapping;
pub mod plan;
pub mod policy;
pub mod registry;
pub mod resolution;
pub mod selection;
pub mod strategies;
pub mod strategy;
pub mod trace;

pub use error::{BuildError, DisposeError, RegistrationError, ResolutionFailedError};
