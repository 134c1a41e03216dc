use serde::Serialize;
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Boxed underlying cause carried by [`ApiError`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Failure reported by the REDCap API layer.
///
/// Carries the HTTP status when the server answered, and the underlying
/// transport or decode error when there is one. Transport failures
/// (timeouts, DNS, connection resets) have no status.
#[derive(Debug)]
pub struct ApiError {
    message: String,
    status: Option<u16>,
    source: Option<BoxError>,
    transport: bool,
}

impl ApiError {
    /// Error for a response the server answered with a non-success status.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
            source: None,
            transport: false,
        }
    }

    /// Error for a request that never produced a response.
    pub fn transport(message: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            status: None,
            source: Some(cause.into()),
            transport: true,
        }
    }

    /// Error without status or cause, e.g. a malformed request or an
    /// undecodable response.
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            source: None,
            transport: false,
        }
    }

    /// Attaches an underlying cause.
    pub fn with_source(mut self, cause: impl Into<BoxError>) -> Self {
        self.source = Some(cause.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// True when the request failed below HTTP and never got a response.
    /// Decode failures of a response that did arrive are not transport errors.
    pub fn is_transport(&self) -> bool {
        self.transport
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, &self.source) {
            (Some(status), _) => write!(f, "{} (HTTP {})", self.message, status),
            (None, Some(cause)) => write!(f, "{}: {}", self.message, cause),
            (None, None) => f.write_str(&self.message),
        }
    }
}

impl StdError for ApiError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

/// Coarse classification of [`AppError`], used by the import report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Storage,
    Parse,
    Api,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Config => "config",
            ErrorKind::Storage => "storage",
            ErrorKind::Parse => "parse",
            ErrorKind::Api => "api",
        };
        f.write_str(name)
    }
}

/// Application-wide error types.
///
/// Only [`AppError::Config`] is fatal to an import run. Storage, parse and
/// API failures are captured per file in the import report and are subject
/// to the run's failure policy.
///
/// # Examples
///
/// ```
/// use qcimport_core::error::{AppError, ErrorKind};
///
/// let err = AppError::Config("unknown module: XYZ".to_string());
/// assert_eq!(err.kind(), ErrorKind::Config);
/// assert_eq!(err.to_string(), "Configuration error: unknown module: XYZ");
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Invalid or missing configuration: unknown module names, missing
    /// credentials, an unreadable config file.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Listing or fetching from the check-file storage failed.
    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A check-definition file could not be parsed or failed validation.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The REDCap API rejected the request or was unreachable.
    #[error("API error: {0}")]
    Api(#[from] ApiError),
}

impl AppError {
    /// Storage error with an underlying cause.
    pub fn storage(message: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        AppError::Storage {
            message: message.into(),
            source: Some(cause.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Config(_) => ErrorKind::Config,
            AppError::Storage { .. } => ErrorKind::Storage,
            AppError::Parse(_) => ErrorKind::Parse,
            AppError::Api(_) => ErrorKind::Api,
        }
    }

    /// HTTP status of the underlying API failure, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            AppError::Api(e) => e.status(),
            _ => None,
        }
    }

    /// Returns a user-friendly error message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Config(msg) => {
                format!("{}\n   Check the profile, module list and config file.", msg)
            }
            AppError::Storage { message, .. } => {
                format!("Cannot read error checks: {}\n   Check the bucket name and storage root for this profile.", message)
            }
            AppError::Api(e) => match e.status() {
                Some(401) | Some(403) => format!(
                    "REDCap rejected the API token: {}\n   Check the token stored for this project path.",
                    e
                ),
                _ if e.is_transport() => format!(
                    "Cannot reach REDCap: {}\n   Check your network connection and the project URL.",
                    e
                ),
                _ => format!("REDCap API error: {}", e),
            },
            AppError::Parse(_) => self.to_string(),
        }
    }
}
