use std::fmt;

/// Result type alias for surge core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for surge core operations
#[derive(Debug)]
pub enum Error {
    /// Invalid configuration, detected at construction before anything is scheduled
    Config(String),

    /// I/O errors (thread spawning)
    Io(std::io::Error),

    /// A component was used after it was shut down
    Shutdown(String),

    /// Other errors
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "Configuration error: {msg}"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Shutdown(msg) => write!(f, "Shut down: {msg}"),
            Error::Other(msg) => write!(f, "Error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}
