//! Error types for feedmail.
//!
//! Every error carries a category ([`ErrorCode`]), a message and an optional
//! wrapped cause. [`code_of`] derives the category of any error by walking its
//! source chain, so callers can handle failures uniformly no matter which
//! layer produced them.

use std::fmt;

use thiserror::Error;

/// Boxed error used as a wrapped cause.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Category of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The error could not be categorized.
    Unknown,
    /// A value given by the caller or the configuration is incorrect.
    InvalidArgument,
    /// Something failed at runtime (network, parsing, persistence, mail).
    Internal,
    /// The requested feature or backend is not implemented.
    Unimplemented,
    /// The operation was canceled.
    Canceled,
    /// The operation timed out.
    DeadlineExceeded,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Unknown => "Unknown",
            ErrorCode::InvalidArgument => "InvalidArgument",
            ErrorCode::Internal => "Internal",
            ErrorCode::Unimplemented => "Unimplemented",
            ErrorCode::Canceled => "Canceled",
            ErrorCode::DeadlineExceeded => "DeadlineExceeded",
        };
        f.write_str(name)
    }
}

/// Common error type for feedmail.
#[derive(Error, Debug)]
pub enum FeedmailError {
    /// Bad configuration, cron spec, URL or DSN.
    #[error("{message}{}", cause_suffix(.source))]
    InvalidArgument {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Network, parse, persistence or mail-transport failure.
    #[error("{message}{}", cause_suffix(.source))]
    Internal {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Unsupported backend scheme or nested transaction.
    #[error("{message}")]
    Unimplemented { message: String },

    /// The surrounding cancellation token fired.
    #[error("operation canceled")]
    Canceled,

    /// A timeout elapsed.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),
}

fn cause_suffix(source: &Option<BoxError>) -> String {
    match source {
        Some(cause) => format!(": {cause}"),
        None => String::new(),
    }
}

impl FeedmailError {
    /// Create an `InvalidArgument` error without a cause.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        FeedmailError::InvalidArgument {
            message: message.into(),
            source: None,
        }
    }

    /// Create an `InvalidArgument` error wrapping a cause.
    pub fn invalid_argument_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        FeedmailError::InvalidArgument {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create an `Internal` error without a cause.
    pub fn internal(message: impl Into<String>) -> Self {
        FeedmailError::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Create an `Internal` error wrapping a cause.
    pub fn internal_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        FeedmailError::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create an `Unimplemented` error.
    pub fn unimplemented(message: impl Into<String>) -> Self {
        FeedmailError::Unimplemented {
            message: message.into(),
        }
    }

    /// Category of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            FeedmailError::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            FeedmailError::Internal { .. } => ErrorCode::Internal,
            FeedmailError::Unimplemented { .. } => ErrorCode::Unimplemented,
            FeedmailError::Canceled => ErrorCode::Canceled,
            FeedmailError::DeadlineExceeded(_) => ErrorCode::DeadlineExceeded,
        }
    }

    /// Human-readable message without the wrapped cause.
    pub fn message(&self) -> &str {
        match self {
            FeedmailError::InvalidArgument { message, .. }
            | FeedmailError::Internal { message, .. }
            | FeedmailError::Unimplemented { message } => message,
            FeedmailError::Canceled => "operation canceled",
            FeedmailError::DeadlineExceeded(message) => message,
        }
    }
}

/// Derive the category of any error.
///
/// The first [`FeedmailError`] found in the source chain decides. Timeouts
/// from `reqwest` and `tokio::time` map to [`ErrorCode::DeadlineExceeded`];
/// anything else is [`ErrorCode::Unknown`].
pub fn code_of(err: &(dyn std::error::Error + 'static)) -> ErrorCode {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(own) = e.downcast_ref::<FeedmailError>() {
            return own.code();
        }
        if let Some(http) = e.downcast_ref::<reqwest::Error>() {
            if http.is_timeout() {
                return ErrorCode::DeadlineExceeded;
            }
        }
        if e.is::<tokio::time::error::Elapsed>() {
            return ErrorCode::DeadlineExceeded;
        }
        current = e.source();
    }
    ErrorCode::Unknown
}

impl From<sqlx::Error> for FeedmailError {
    fn from(e: sqlx::Error) -> Self {
        FeedmailError::internal_with("database error", e)
    }
}

impl From<std::io::Error> for FeedmailError {
    fn from(e: std::io::Error) -> Self {
        FeedmailError::internal_with("I/O error", e)
    }
}

/// Result type alias for feedmail operations.
pub type Result<T> = std::result::Result<T, FeedmailError>;
