use thiserror::Error;

pub const CANCELLED_BY_USER: &str = "cancelled by user";

/// Failure classes shared by resolver adapters and the transfer engine. The
/// queue treats every class the same way (try the next adapter); the class
/// only survives in logs and in the entry's error text.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("blocked by upstream: {0}")]
    Blocked(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("cancelled by user")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unavailable,
    Blocked,
    NotFound,
    InvalidResponse,
    Cancelled,
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Unavailable(_) | FetchError::Io(_) => ErrorKind::Unavailable,
            FetchError::Blocked(_) => ErrorKind::Blocked,
            FetchError::NotFound(_) => ErrorKind::NotFound,
            FetchError::InvalidResponse(_) => ErrorKind::InvalidResponse,
            FetchError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }

    /// Maps a non-success HTTP status onto the taxonomy.
    pub fn from_status(status: reqwest::StatusCode, context: &str) -> Self {
        match status.as_u16() {
            404 | 410 => FetchError::NotFound(format!("HTTP {} from {}", status, context)),
            401 | 403 | 429 | 451 => {
                FetchError::Blocked(format!("HTTP {} from {}", status, context))
            }
            _ => FetchError::Unavailable(format!("HTTP {} from {}", status, context)),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return FetchError::from_status(status, "upstream");
        }
        if err.is_decode() {
            return FetchError::InvalidResponse(err.to_string());
        }
        FetchError::Unavailable(err.to_string())
    }
}
