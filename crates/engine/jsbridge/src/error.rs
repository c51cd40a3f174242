//! Error types for the script bridge

use thiserror::Error;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the script bridge
#[derive(Error, Debug)]
pub enum Error {
    /// Exception raised by a script, including interruption
    #[error("Script error: {0}")]
    Script(String),

    /// Engine API failure outside of script execution
    #[error("Engine error: {0}")]
    Engine(String),

    /// Global or property is not callable
    #[error("Not a function: {0}")]
    NotAFunction(String),

    /// Property lookup failed
    #[error("Property not found: {0}")]
    PropertyNotFound(String),

    /// Type conversion error
    #[error("Type error: expected {expected}, got {actual}")]
    TypeError { expected: String, actual: String },

    /// Invalid value
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// KDL parsing error
    #[error("KDL parse error: {0}")]
    KdlParse(#[from] kdl::KdlError),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rquickjs::Error> for Error {
    fn from(err: rquickjs::Error) -> Self {
        Error::Engine(err.to_string())
    }
}

impl<'js> From<rquickjs::CaughtError<'js>> for Error {
    fn from(err: rquickjs::CaughtError<'js>) -> Self {
        match err {
            rquickjs::CaughtError::Error(err) => err.into(),
            other => Error::Script(other.to_string()),
        }
    }
}
