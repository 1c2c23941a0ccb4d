use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Whether a remote failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteErrorKind {
    /// Timeouts, connection failures and 5xx replies.
    Transient,
    /// 4xx replies, explicit `"status": "error"` envelopes and malformed replies.
    Permanent,
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteErrorKind::Transient => write!(f, "transient"),
            RemoteErrorKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// Failure of one logical call against a remote instance.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} remote error{}: {message}", status_suffix(.status))]
pub struct RemoteError {
    kind: RemoteErrorKind,
    status: Option<u16>,
    message: String,
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {})", code),
        None => String::new(),
    }
}

impl RemoteError {
    pub fn transient(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Transient,
            status,
            message: message.into(),
        }
    }

    pub fn permanent(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Permanent,
            status,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> RemoteErrorKind {
        self.kind
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_transient(&self) -> bool {
        self.kind == RemoteErrorKind::Transient
    }
}

/// Global error type for fleet operations.
#[derive(Error, Debug)]
pub enum FleetError {
    /// A remote call failed. Transient failures have already been retried.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The operation was refused; the instance state is unchanged.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown instance or watchlist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// The storage collaborator failed.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl FleetError {
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// The remote failure behind this error, if any.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            FleetError::Remote(e) => Some(e),
            _ => None,
        }
    }
}

/// A specialized Result type for fleet operations.
pub type Result<T> = std::result::Result<T, FleetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display_includes_status() {
        let e = RemoteError::transient(Some(503), "Service Unavailable");
        assert_eq!(
            e.to_string(),
            "transient remote error (HTTP 503): Service Unavailable"
        );

        let e = RemoteError::permanent(None, "malformed reply");
        assert_eq!(e.to_string(), "permanent remote error: malformed reply");
    }

    #[test]
    fn test_fleet_error_wraps_remote_transparently() {
        let err: FleetError = RemoteError::permanent(Some(401), "Invalid API key").into();
        assert_eq!(
            err.to_string(),
            "permanent remote error (HTTP 401): Invalid API key"
        );
        assert_eq!(err.remote().and_then(|r| r.status()), Some(401));
        assert!(FleetError::not_found("instance", 7).remote().is_none());
    }
}
