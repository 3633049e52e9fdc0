//! Configuration types and loading for the table sink delivery core.

mod environment;
mod load;
pub mod shared;

pub use environment::{APP_ENVIRONMENT_ENV_NAME, Environment};
pub use load::{Config, LoadConfigError, load_config, load_config_from_dir};
