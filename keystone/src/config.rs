//! Application configuration is loaded once, when the [Application](crate::application::Application)
//! is created, and registered in its container as an [ApplicationConfig] instance, so any component
//! can depend on it.
//!
//! By default, the config is created with opinionated default values, which can then be overwritten
//! by environment variables prefixed with `KEYSTONE_` or the `keystone.json` file.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use keystone_di::container::ContainerOptions;
use keystone_di::injectable;
use serde::Deserialize;

const CONFIG_ENV_PREFIX: &str = "KEYSTONE";

/// Name of the default config file.
pub const CONFIG_FILE: &str = "keystone.json";

/// Framework configuration.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub struct ApplicationConfig {
    /// Should a default tracing logger be installed in the scope of the application.
    pub install_tracing_logger: bool,
    /// Maximum depth of nested dependency resolution in the application container.
    pub max_resolution_depth: usize,
}

injectable!(ApplicationConfig);

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            install_tracing_logger: true,
            max_resolution_depth: ContainerOptions::default().max_resolution_depth,
        }
    }
}

impl From<OptionalApplicationConfig> for ApplicationConfig {
    fn from(value: OptionalApplicationConfig) -> Self {
        let default = Self::default();
        Self {
            install_tracing_logger: value
                .install_tracing_logger
                .unwrap_or(default.install_tracing_logger),
            max_resolution_depth: value
                .max_resolution_depth
                .unwrap_or(default.max_resolution_depth),
        }
    }
}

impl ApplicationConfig {
    /// Loads the config from the optional config file and environment variables.
    pub fn init_from_environment() -> Result<Self, ConfigError> {
        Self::init_from_builder(
            Config::builder()
                .add_source(File::with_name(CONFIG_FILE).required(false))
                .add_source(Environment::with_prefix(CONFIG_ENV_PREFIX)),
        )
    }

    fn init_from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        builder
            .build()
            .and_then(|config| config.try_deserialize::<OptionalApplicationConfig>())
            .map(|config| config.into())
    }

    /// Options for the application container.
    pub fn container_options(&self) -> ContainerOptions {
        ContainerOptions {
            max_resolution_depth: self.max_resolution_depth,
        }
    }
}

#[derive(Deserialize)]
struct OptionalApplicationConfig {
    install_tracing_logger: Option<bool>,
    max_resolution_depth: Option<usize>,
}
