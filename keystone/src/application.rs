//! Core application framework functionality.

use crate::config::ApplicationConfig;
use crate::runner::{ApplicationRunnerPtr, ErrorPtr};
use config::ConfigError;
use derive_more::Constructor;
use keystone_di::container::{Container, RegistrationOptions};
use keystone_di::{RegistrationError, ResolutionFailedError};
use std::cmp::Reverse;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error("Error loading configuration: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Error registering configuration: {0}")]
    RegistrationError(#[from] RegistrationError),
    #[error("Error retrieving runners: {0}")]
    RunnerResolutionError(ResolutionFailedError),
    #[error("Runner error: {0}")]
    RunnerError(ErrorPtr),
}

/// Main entrypoint for the application. Bootstraps the application and runs
/// [ApplicationRunners](crate::runner::ApplicationRunner) registered in the container.
#[derive(Constructor)]
pub struct Application {
    container: Container,
}

impl Application {
    /// Creates an application with a new container configured from the environment. The loaded
    /// [ApplicationConfig] is registered in the container.
    pub fn from_environment() -> Result<Self, ApplicationError> {
        let config = ApplicationConfig::init_from_environment()?;
        let container = Container::with_options(config.container_options());
        container.register_instance(Arc::new(config), RegistrationOptions::new())?;

        Ok(Self::new(container))
    }

    /// Container used to register application components.
    #[inline]
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Runs all registered runners, highest priority first.
    pub fn run(&self) -> Result<(), ApplicationError> {
        let config = self.config();
        if config.install_tracing_logger {
            install_tracing_logger();
        }

        info!("Searching for application runners...");

        let mut runners = self
            .container
            .resolve_all::<ApplicationRunnerPtr>()
            .map_err(ApplicationError::RunnerResolutionError)?;

        runners.sort_by_key(|runner| Reverse(runner.priority()));

        info!(count = runners.len(), "Running application runners...");

        for runner in &runners {
            runner.run().map_err(ApplicationError::RunnerError)?;
        }

        Ok(())
    }

    fn config(&self) -> Arc<ApplicationConfig> {
        if !self.container.is_registered::<ApplicationConfig>(None) {
            return Arc::new(ApplicationConfig::default());
        }

        self.container
            .resolve::<ApplicationConfig>()
            .unwrap_or_else(|error| {
                warn!(%error, "Cannot resolve application config, using defaults.");
                Arc::new(ApplicationConfig::default())
            })
    }
}

fn install_tracing_logger() {
    let result = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    if result.is_err() {
        debug!("Tracing subscriber already installed.");
    }
}

#[cfg(test)]
mod tests {
    use crate::application::{Application, ApplicationError};
    use crate::config::ApplicationConfig;
    use crate::runner::{ApplicationRunnerPtr, ErrorPtr, MockApplicationRunner};
    use keystone_di::container::{Container, RegistrationOptions};
    use mockall::Sequence;
    use std::error::Error;
    use std::fmt::{Display, Formatter};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestError;

    impl Display for TestError {
        fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error")
        }
    }

    impl Error for TestError {}

    fn quiet_container() -> Container {
        let container = Container::new();
        let mut config = ApplicationConfig::default();
        config.install_tracing_logger = false;
        container
            .register_instance(Arc::new(config), RegistrationOptions::new())
            .unwrap();
        container
    }

    fn register_runner(container: &Container, name: &str, runner: MockApplicationRunner) {
        container
            .register_instance::<ApplicationRunnerPtr>(
                Arc::new(runner),
                RegistrationOptions::named(name),
            )
            .unwrap();
    }

    #[test]
    fn should_run_runners_by_priority() {
        let container = quiet_container();
        let mut seq = Sequence::new();

        let mut low = MockApplicationRunner::new();
        low.expect_priority().return_const(-128i8);

        let mut high = MockApplicationRunner::new();
        high.expect_priority().return_const(127i8);

        high.expect_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        low.expect_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));

        register_runner(&container, "low", low);
        register_runner(&container, "high", high);

        Application::new(container).run().unwrap();
    }

    #[test]
    fn should_stop_on_runner_error() {
        let container = quiet_container();

        let mut failing = MockApplicationRunner::new();
        failing.expect_priority().return_const(1i8);
        failing
            .expect_run()
            .times(1)
            .returning(|| Err(Arc::new(TestError) as ErrorPtr));

        let mut skipped = MockApplicationRunner::new();
        skipped.expect_priority().return_const(0i8);
        skipped.expect_run().never();

        register_runner(&container, "failing", failing);
        register_runner(&container, "skipped", skipped);

        assert!(matches!(
            Application::new(container).run(),
            Err(ApplicationError::RunnerError(_))
        ));
    }

    #[test]
    fn should_run_without_runners() {
        assert!(Application::new(quiet_container()).run().is_ok());
    }

    #[test]
    fn should_fall_back_to_default_config() {
        let application = Application::new(Container::new());
        assert!(application.config().install_tracing_logger);
    }

    #[test]
    fn should_fall_back_to_default_config_on_failure() {
        let container = Container::new();
        container
            .register_factory::<ApplicationConfig, _>(RegistrationOptions::new(), |_| {
                Err(Arc::new(TestError) as ErrorPtr)
            })
            .unwrap();

        let application = Application::new(container);
        assert!(application.config().install_tracing_logger);
    }
}
