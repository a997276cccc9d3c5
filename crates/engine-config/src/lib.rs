pub mod error;
pub mod loader;
pub mod report;
pub mod validate;
pub mod xml;

pub use error::ConfigError;
pub use loader::{LoadedConfig, load_global, load_plan};
