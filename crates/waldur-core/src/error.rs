//! Error types for Waldur operations.
//!
//! Every failure is surfaced to the immediate caller. The only failure handled
//! internally is the bounded 409 retry loop in [`crate::client`].

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Main error type for Waldur operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// No response was obtained (connection refused, DNS failure, timeout).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered with a status outside the expected set.
    #[error("Server refuses to communicate. {method} {url}. Status: {status}. Detail: {detail}")]
    Request {
        /// HTTP method of the failed call
        method: String,
        /// Absolute URL of the failed call
        url: String,
        /// Response status code
        status: u16,
        /// Best-effort parse of the response body
        detail: Value,
    },

    /// A 409 conflict persisted across the whole retry budget.
    #[error("Reached a limit of retries for the operation: {method} {url}, body: {body}")]
    RetryExhausted {
        /// HTTP method of the failed call
        method: String,
        /// Absolute URL of the failed call
        url: String,
        /// Body of the last conflict response
        body: String,
    },

    /// A lookup returned zero matches.
    #[error("Object does not exist: {0}")]
    ObjectDoesNotExist(String),

    /// A lookup returned several matches where exactly one was expected.
    #[error("Multiple objects returned: {0}")]
    MultipleObjectsReturned(String),

    /// Caller supplied an invalid argument combination.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A polled resource reached its error terminal state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A polled resource did not reach a terminal state in time.
    #[error(
        "Resource \"{endpoint}\" with id \"{identifier}\" has not {condition}. Seconds passed: {secs}",
        secs = .elapsed.as_secs_f64()
    )]
    Timeout {
        /// Endpoint that was polled
        endpoint: String,
        /// Identifier of the polled resource
        identifier: String,
        /// Condition that was awaited
        condition: String,
        /// Accumulated waiting time
        elapsed: Duration,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// URL could not be built
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Response body had an unexpected shape
    #[error("Failed to parse response: {0}")]
    Parse(String),
}

/// Specialized result type for Waldur operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the error code for this error type.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Request { .. } => "REQUEST_ERROR",
            Self::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            Self::ObjectDoesNotExist(_) => "OBJECT_DOES_NOT_EXIST",
            Self::MultipleObjectsReturned(_) => "MULTIPLE_OBJECTS_RETURNED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Config(_) => "CONFIG_ERROR",
            Self::InvalidEndpoint(_) => "INVALID_ENDPOINT",
            Self::Parse(_) => "PARSE_ERROR",
        }
    }

    /// Status code of a [`Error::Request`], if this is one.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Request { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true for the "zero matches" outcome of a lookup.
    #[must_use]
    pub const fn is_does_not_exist(&self) -> bool {
        matches!(self, Self::ObjectDoesNotExist(_))
    }
}

// Conversions from external error types
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidEndpoint(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            Error::Transport("refused".to_string()).error_code(),
            "TRANSPORT_ERROR"
        );
        assert_eq!(
            Error::RetryExhausted {
                method: "POST".to_string(),
                url: "http://example.com/api/customers/".to_string(),
                body: String::new(),
            }
            .error_code(),
            "RETRY_EXHAUSTED"
        );
        assert_eq!(
            Error::ObjectDoesNotExist("x".to_string()).error_code(),
            "OBJECT_DOES_NOT_EXIST"
        );
        assert_eq!(
            Error::MultipleObjectsReturned("x".to_string()).error_code(),
            "MULTIPLE_OBJECTS_RETURNED"
        );
        assert_eq!(
            Error::Validation("x".to_string()).error_code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            Error::InvalidState("x".to_string()).error_code(),
            "INVALID_STATE"
        );
        assert_eq!(Error::Parse("x".to_string()).error_code(), "PARSE_ERROR");
    }

    #[test]
    fn test_request_error_display() {
        let err = Error::Request {
            method: "GET".to_string(),
            url: "http://example.com/api/projects/".to_string(),
            status: 400,
            detail: json!({"name": ["This field is required."]}),
        };
        let text = err.to_string();
        assert!(text.starts_with("Server refuses to communicate. GET http://example.com/api/projects/"));
        assert!(text.contains("Status: 400"));
        assert!(text.contains("This field is required."));
        assert_eq!(err.status(), Some(400));
    }

    #[test]
    fn test_timeout_display() {
        let err = Error::Timeout {
            endpoint: "openstack-volumes".to_string(),
            identifier: "abc".to_string(),
            condition: "changed state to stable".to_string(),
            elapsed: Duration::from_secs(30),
        };
        assert_eq!(
            err.to_string(),
            "Resource \"openstack-volumes\" with id \"abc\" has not changed state to stable. Seconds passed: 30"
        );
    }

    #[test]
    fn test_from_url_parse_error() {
        let err = url::Url::parse("not a url").unwrap_err();
        let waldur_err: Error = err.into();
        assert!(matches!(waldur_err, Error::InvalidEndpoint(_)));
    }

    #[test]
    fn test_from_serde_json_error() {
        let err = serde_json::from_str::<Value>("{invalid json}").unwrap_err();
        let waldur_err: Error = err.into();
        assert!(matches!(waldur_err, Error::Parse(_)));
    }

    #[test]
    fn test_is_does_not_exist() {
        assert!(Error::ObjectDoesNotExist("x".to_string()).is_does_not_exist());
        assert!(!Error::Validation("x".to_string()).is_does_not_exist());
        assert_eq!(Error::Validation("x".to_string()).status(), None);
    }
}
