mod loader;
mod types;
mod validate;

pub use loader::{load_config, load_config_from_str};
pub use types::*;
pub use validate::validate_config;

/// Error type for configuration handling.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("unknown listing parser '{key}' for endpoint {code}")]
    UnknownParser { code: String, key: String },

    #[error("unknown upload strategy '{key}' for endpoint {code}")]
    UnknownUpload { code: String, key: String },

    #[error("invalid endpoint {code}: {reason}")]
    InvalidEndpoint { code: String, reason: String },
}
