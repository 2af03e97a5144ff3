//! Error handling for membermesh
//!
//! Provides a unified error type and result type shared by the membermesh crates.

/// Result type alias for membermesh operations
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for membermesh
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Address could not be parsed
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Layered configuration errors
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Create an address parse error
    pub fn invalid_address(msg: impl Into<String>) -> Self {
        Self::InvalidAddress(msg.into())
    }
}
