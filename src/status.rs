use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The failure classes a caller can observe. Everything the service can
/// get wrong maps onto one of these before it crosses the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Code {
    /// No function registered under the requested name.
    NotFound,
    /// The caller supplied something malformed: an undecodable value, an
    /// option outside its legal set, surplus inputs, or the wrong call
    /// shape for the function.
    InvalidArgument,
    /// The request's credential was absent or wrong.
    PermissionDenied,
    /// The service or a registered function broke its own contract.
    Internal,
    /// A dependency of the function is temporarily unreachable.
    Unavailable,
}

impl Code {
    fn name(&self) -> &'static str {
        use Code::*;
        match self {
            NotFound => "not found",
            InvalidArgument => "invalid argument",
            PermissionDenied => "permission denied",
            Internal => "internal",
            Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A classified, human-readable failure, as reported to the caller.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Error)]
#[error("{code}: {message}")]
pub struct Status {
    pub code: Code,
    pub message: String,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(function: &str) -> Self {
        Self::new(Code::NotFound, format!("function '{function}' not found"))
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    /// Deliberately uniform: a missing credential and a wrong one read
    /// the same to the caller.
    pub fn permission_denied() -> Self {
        Self::new(Code::PermissionDenied, "invalid or missing credential")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }
}
