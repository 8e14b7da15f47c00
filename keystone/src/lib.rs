//! Application framework based on [keystone_di] dependency injection.
//!
//! Traditional applications start in the `main()` function and often explicitly initialize and pass
//! around various domain/application services or other components. With dependency injection in
//! place, all application components can become decoupled and form a dependency graph managed by a
//! container. This, in turn, requires an entrypoint for the application which initializes the
//! container and runs the actual business logic of the application. This crate provides such
//! entrypoint in the form of [Application](application::Application), which also configures
//! additional supporting infrastructure, e.g. logging.

pub mod application;
pub mod config;
pub mod runner;
