//! # Error Definitions
//!
//! The taxonomy shared by every layer of the runtime. Anything that crosses the boundary is
//! reduced to an `ErrorPayload` so the other side can rethrow it natively.

use std::time::Duration;

use tetherrpc::ErrorPayload;

use crate::transport;

/// A failure raised by code running on the other side, with its native name and stack.
pub type RemoteError = ErrorPayload;

#[derive(Debug, Clone)]
pub enum Error {
    /// The far side raised while performing the operation.
    Remote(RemoteError),
    /// The reply did not arrive within the call's timeout.
    Timeout { label: String, timeout: Duration },
    /// The proxy was destroyed before the operation was attempted.
    Destroyed { label: String },
    /// No namespace is registered under the key.
    NamespaceNotFound(String),
    /// A namespace is already registered under the key.
    NamespaceExists(String),
    /// A typed proxy was asked for a property its schema does not declare.
    UnknownProperty { schema: &'static str, name: String },
    /// An application is already registered under the key.
    DuplicateApp(String),
    Transport(transport::Error),
    /// A frame or argument did not have the expected shape.
    Protocol(String),
    /// The local script engine failed outside of user code.
    Script(String),
    Io(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote(e) => write!(f, "Remote error: {}", e),
            Self::Timeout { label, timeout } => {
                write!(f, "Call {} timed out after {:?}", label, timeout)
            }
            Self::Destroyed { label } => write!(f, "Reference used after destroy: {}", label),
            Self::NamespaceNotFound(key) => write!(f, "Namespace not found: {}", key),
            Self::NamespaceExists(key) => write!(f, "Namespace already exists: {}", key),
            Self::UnknownProperty { schema, name } => {
                write!(f, "{} does not declare property {}", schema, name)
            }
            Self::DuplicateApp(key) => write!(f, "Application already registered: {}", key),
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            Self::Script(msg) => write!(f, "Script engine error: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// The error name reported to the other side.
    pub fn name(&self) -> &str {
        match self {
            Self::Remote(e) => &e.name,
            Self::Timeout { .. } => "TimeoutError",
            Self::Destroyed { .. } => "DestroyedReferenceError",
            Self::NamespaceNotFound(_) => "NamespaceNotFoundError",
            Self::NamespaceExists(_) => "NamespaceExistsError",
            Self::UnknownProperty { .. } => "UnknownPropertyError",
            Self::DuplicateApp(_) => "DuplicateAppError",
            Self::Transport(_) => "TransportError",
            Self::Protocol(_) => "ProtocolError",
            Self::Script(_) => "ScriptEngineError",
            Self::Io(_) => "IoError",
        }
    }

    /// Reduces the error to its wire form. Remote errors pass through untouched.
    pub fn to_payload(&self) -> ErrorPayload {
        match self {
            Self::Remote(e) => e.clone(),
            other => ErrorPayload::new(other.name(), other.to_string()),
        }
    }
}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<tetherrpc::Error> for Error {
    fn from(e: tetherrpc::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}

impl From<tetherpack::Error> for Error {
    fn from(e: tetherpack::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}

impl From<rquickjs::Error> for Error {
    fn from(e: rquickjs::Error) -> Self {
        Self::Script(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(format!("malformed script payload: {}", e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
