use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Main error type for the govnet directory service
#[derive(Debug)]
pub enum GovnetError {
    /// Dataset is not known to the network
    NotFound(String),

    /// Dataset is known but the node hosting it is not available
    Gone(String),

    /// Transient failure talking to a peer node or collaborator
    ServiceUnavailable(String),

    /// Malformed caller input, including missing or malformed bearer tokens
    BadRequest(String),

    /// Bearer token did not validate against any known signing key
    InvalidSignature(String),

    /// No eligible multicast recipients
    EmptyMembership,

    /// Non-success answer from an owning node, forwarded as-is
    Upstream { status: StatusCode, message: String },

    /// Encoding or other internal failures
    Internal(String),

    /// Configuration or CLI argument errors
    Config(String),

    /// System I/O errors
    Io(std::io::Error),

    /// Serialization/deserialization errors
    Serialization(SerializationError),

    /// Internal lock poisoning or concurrency errors
    Concurrency(String),
}

/// Serialization related errors
#[derive(Debug)]
pub enum SerializationError {
    /// JSON serialization/deserialization errors
    Json(serde_json::Error),
}

impl fmt::Display for GovnetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GovnetError::NotFound(msg) => write!(f, "Not found: {}", msg),
            GovnetError::Gone(msg) => write!(f, "Gone: {}", msg),
            GovnetError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            GovnetError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            GovnetError::InvalidSignature(msg) => write!(f, "Invalid signature: {}", msg),
            GovnetError::EmptyMembership => write!(f, "No members eligible for multicast"),
            GovnetError::Upstream { status, message } => {
                write!(f, "Upstream error {}: {}", status.as_u16(), message)
            }
            GovnetError::Internal(msg) => write!(f, "Internal error: {}", msg),
            GovnetError::Config(msg) => write!(f, "Configuration error: {}", msg),
            GovnetError::Io(err) => write!(f, "I/O error: {}", err),
            GovnetError::Serialization(err) => write!(f, "Serialization error: {}", err),
            GovnetError::Concurrency(msg) => write!(f, "Concurrency error: {}", msg),
        }
    }
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializationError::Json(err) => write!(f, "JSON: {}", err),
        }
    }
}

impl std::error::Error for GovnetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GovnetError::Io(err) => Some(err),
            GovnetError::Serialization(SerializationError::Json(err)) => Some(err),
            _ => None,
        }
    }
}

impl std::error::Error for SerializationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SerializationError::Json(err) => Some(err),
        }
    }
}

// Convenient type alias for Results using our error type
pub type Result<T> = std::result::Result<T, GovnetError>;

impl IntoResponse for GovnetError {
    fn into_response(self) -> Response {
        // Upstream answers go back to the client untranslated
        if let GovnetError::Upstream { status, message } = self {
            return (status, message).into_response();
        }

        let status_code = self.status_code();
        let error_response = json!({
            "error": {
                "code": status_code.as_u16(),
                "message": self.user_message(),
                "type": self.error_type(),
            }
        });

        (status_code, Json(error_response)).into_response()
    }
}

impl GovnetError {
    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GovnetError::NotFound(_) => StatusCode::NOT_FOUND,
            GovnetError::Gone(_) => StatusCode::GONE,
            GovnetError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GovnetError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GovnetError::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
            GovnetError::EmptyMembership => StatusCode::SERVICE_UNAVAILABLE,
            GovnetError::Upstream { status, .. } => *status,
            GovnetError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GovnetError::Config(_) => StatusCode::BAD_REQUEST,
            GovnetError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GovnetError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GovnetError::Concurrency(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a user-facing error message
    pub fn user_message(&self) -> String {
        match self {
            GovnetError::NotFound(msg) => msg.clone(),
            GovnetError::Gone(msg) => msg.clone(),
            GovnetError::ServiceUnavailable(_) => {
                "Service is not available. Please try again later.".to_string()
            }
            GovnetError::BadRequest(msg) => format!("Invalid request: {}", msg),
            GovnetError::InvalidSignature(_) => "Could not verify token".to_string(),
            GovnetError::EmptyMembership => "No members in the multicast group".to_string(),
            GovnetError::Upstream { message, .. } => message.clone(),
            GovnetError::Config(msg) => format!("Configuration error: {}", msg),
            GovnetError::Internal(_)
            | GovnetError::Io(_)
            | GovnetError::Serialization(_)
            | GovnetError::Concurrency(_) => {
                "Internal server error. Please try again later.".to_string()
            }
        }
    }

    /// Get the error type identifier
    pub fn error_type(&self) -> &'static str {
        match self {
            GovnetError::NotFound(_) => "not_found",
            GovnetError::Gone(_) => "gone",
            GovnetError::ServiceUnavailable(_) => "service_unavailable",
            GovnetError::BadRequest(_) => "bad_request",
            GovnetError::InvalidSignature(_) => "invalid_signature",
            GovnetError::EmptyMembership => "empty_membership",
            GovnetError::Upstream { .. } => "upstream_error",
            GovnetError::Internal(_) => "internal_error",
            GovnetError::Config(_) => "configuration_error",
            GovnetError::Io(_) => "io_error",
            GovnetError::Serialization(_) => "serialization_error",
            GovnetError::Concurrency(_) => "concurrency_error",
        }
    }
}

// Conversions from common error types
impl From<std::io::Error> for GovnetError {
    fn from(err: std::io::Error) -> Self {
        GovnetError::Io(err)
    }
}

impl From<serde_json::Error> for GovnetError {
    fn from(err: serde_json::Error) -> Self {
        GovnetError::Serialization(SerializationError::Json(err))
    }
}

impl From<SerializationError> for GovnetError {
    fn from(err: SerializationError) -> Self {
        GovnetError::Serialization(err)
    }
}

impl From<reqwest::Error> for GovnetError {
    fn from(err: reqwest::Error) -> Self {
        GovnetError::ServiceUnavailable(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for GovnetError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        GovnetError::ServiceUnavailable(format!("deadline exceeded: {}", err))
    }
}

// Helper macros for common error construction patterns
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::GovnetError::Config($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::GovnetError::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! bad_request {
    ($msg:expr) => {
        $crate::error::GovnetError::BadRequest($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::GovnetError::BadRequest(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::error::GovnetError::Internal($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::GovnetError::Internal(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! concurrency_error {
    ($msg:expr) => {
        $crate::error::GovnetError::Concurrency($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::GovnetError::Concurrency(format!($fmt, $($arg)*))
    };
}
