//! Error types for hopwire

use thiserror::Error;

/// Main error type for hopwire
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config text could not be decoded at all.
    #[error("decode error: {0}")]
    Decode(String),

    /// A payload was missing a field, had a mistyped one, or carried an unknown one.
    #[error("invalid {path}: {message}")]
    Schema { path: String, message: String },

    /// The discriminator key was present but not a string.
    #[error("type error: {0}")]
    TypeError(String),

    /// No builder handles this node. `first-supported` skips these.
    #[error("unsupported config: {0}")]
    Unsupported(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Breadcrumb added by the dispatcher around a failing builder. The
    /// cause is part of the message, not of the `source()` chain.
    #[error("failed to build {role} of type \"{kind}\": {cause}")]
    Build {
        kind: String,
        role: String,
        cause: Box<Error>,
    },

    /// An `error:` node declared by the config provider.
    #[error("{message}")]
    Provider {
        message: String,
        details: Option<serde_json::Value>,
    },

    /// The tunnel's `reporter` node did not compile.
    #[error("invalid reporter config: {0}")]
    Reporter(Box<Error>),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("blocked by config")]
    Blocked,

    #[error("no dialer available for address {0}")]
    NoRoute(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("connection closed")]
    Closed,

    /// Closing a composite connection failed for one or more members.
    #[error("failed to close {} connection(s): {}", .0.len(), join_errors(.0))]
    CloseFailed(Vec<Error>),

    #[error("timeout")]
    Timeout,
}

impl Error {
    pub fn schema(path: impl Into<String>, message: impl ToString) -> Self {
        Error::Schema {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error, or the error wrapped by a chain of build breadcrumbs,
    /// means "no builder for this node".
    pub fn is_unsupported(&self) -> bool {
        match self {
            Error::Unsupported(_) => true,
            Error::Build { cause, .. } => cause.is_unsupported(),
            _ => false,
        }
    }

    /// The innermost error beneath build breadcrumbs.
    pub fn root(&self) -> &Error {
        match self {
            Error::Build { cause, .. } => cause.root(),
            other => other,
        }
    }
}

fn join_errors(errors: &[Error]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Result type alias for hopwire
pub type Result<T> = std::result::Result<T, Error>;
