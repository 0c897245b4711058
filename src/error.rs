//! Error types for KhanitraIO

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// KhanitraIO error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// GPIO line could not be claimed or has disappeared
    #[error("GPIO pin {0} is not available")]
    DeviceUnavailable(u32),

    /// Operation on a pin that has already been released
    #[error("GPIO pin {0} has been closed")]
    DeviceClosed(u32),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Echo edge not observed within the ranging timeout
    #[error("echo timeout on {0} sensor")]
    EchoTimeout(&'static str),

    /// Unknown motor id or direction token
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// Wire serialization failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration file could not be parsed
    #[error("config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Configuration file could not be written
    #[error("config write error: {0}")]
    TomlWrite(#[from] toml::ser::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
