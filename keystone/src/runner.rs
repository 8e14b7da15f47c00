//! Runners executing actual application logic.

use keystone_di::injectable;
pub use keystone_di::instance::ErrorPtr;
#[cfg(test)]
use mockall::automock;

pub type ApplicationRunnerPtr = dyn ApplicationRunner + Send + Sync;

/// Runs application logic. Runners are run by the [Application](crate::application::Application)
/// and are discovered by resolving all registrations of [ApplicationRunnerPtr] in the application
/// container.
#[cfg_attr(test, automock)]
pub trait ApplicationRunner {
    /// Runs any application code.
    fn run(&self) -> Result<(), ErrorPtr>;

    /// Returns the priority for this runner. Higher priorities get run first. Default 0.
    fn priority(&self) -> i8 {
        0
    }
}

injectable!(ApplicationRunnerPtr);
