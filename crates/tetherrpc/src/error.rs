//! # Error Definitions

use tetherpack::Error as PackError;

/// Failures of the envelope itself.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The underlying tetherpack encoding failed.
    Serialization(PackError),
    /// A required field was absent.
    MissingField(String),
    /// A field held a value of the wrong shape.
    TypeMismatch { field: String, expected: &'static str },
    /// An unknown top-level frame type was encountered.
    UnknownFrame(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(e) => write!(f, "Serialization failed: {}", e),
            Self::MissingField(field) => write!(f, "Missing field: {}", field),
            Self::TypeMismatch { field, expected } => {
                write!(f, "Field {} is not a {}", field, expected)
            }
            Self::UnknownFrame(kind) => write!(f, "Unknown frame type: {}", kind),
        }
    }
}

impl std::error::Error for Error {}

impl From<PackError> for Error {
    fn from(e: PackError) -> Self {
        Self::Serialization(e)
    }
}

/// A specialized Result type for envelope operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The "Err" side of a Reply: a failure raised while performing the operation remotely.
///
/// Mirrors the shape of a script engine error so it can be rethrown on either side.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorPayload {
    pub name: String,
    pub message: String,
    pub stack: String,
}

impl ErrorPayload {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), message: message.into(), stack: String::new() }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = stack.into();
        self
    }
}

impl std::fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for ErrorPayload {}
