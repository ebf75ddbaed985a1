//! Errors as reported across the library boundary
//!
//! Callers outside Rust (an app shell, a CLI printing JSON) get a
//! [`PlatformError`]: a stable code, a human message, optional structured
//! details and an optional cause chain.

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    #[serde(rename = "ERR_INVALID_CONFIG")]
    InvalidConfig,
    /// The config provider sent an `error` node instead of a transport.
    #[serde(rename = "ERR_PROVIDER")]
    Provider,
    #[serde(rename = "ERR_INTERNAL_ERROR")]
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidConfig => "ERR_INVALID_CONFIG",
            ErrorCode::Provider => "ERR_PROVIDER",
            ErrorCode::Internal => "ERR_INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("{code}: {message}")]
pub struct PlatformError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<PlatformError>>,
}

impl PlatformError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            cause: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_cause(mut self, cause: PlatformError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn to_json(&self) -> String {
        // Plain strings and JSON values only; this cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"code\":\"{}\"}}", self.code))
    }
}

/// An error with no better classification, kept as a cause.
fn internal(err: &Error) -> PlatformError {
    PlatformError::new(ErrorCode::Internal, err.to_string())
}

impl From<&Error> for PlatformError {
    fn from(err: &Error) -> Self {
        match err {
            Error::Provider { message, details } => {
                let platform = PlatformError::new(ErrorCode::Provider, message.clone());
                match details {
                    Some(details) => platform.with_details(details.clone()),
                    None => platform,
                }
            }
            Error::Reporter(cause) => PlatformError::new(ErrorCode::InvalidConfig, "invalid reporter config")
                .with_cause(internal(cause)),
            Error::Decode(_) => {
                PlatformError::new(ErrorCode::InvalidConfig, "config is not valid YAML").with_cause(internal(err))
            }
            // Client-level validation speaks for itself.
            Error::Config(message) => PlatformError::new(ErrorCode::InvalidConfig, message.clone()),
            e if e.is_unsupported() => {
                PlatformError::new(ErrorCode::InvalidConfig, "unsupported config").with_cause(internal(err))
            }
            Error::Build { .. } | Error::Schema { .. } | Error::TypeError(_) => {
                PlatformError::new(ErrorCode::InvalidConfig, "failed to create transport").with_cause(internal(err))
            }
            other => internal(other),
        }
    }
}

impl From<Error> for PlatformError {
    fn from(err: Error) -> Self {
        PlatformError::from(&err)
    }
}
