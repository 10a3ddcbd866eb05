/// Errors from artifact store operations.
///
/// Only [`StorageError::Unavailable`] is worth retrying; everything else
/// will fail the same way again.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    Forbidden(String),

    /// A 4xx other than not-found / forbidden.
    #[error("Request rejected with HTTP {status}: {target}")]
    Rejected { status: u16, target: String },

    /// Network failure, timeout or a 5xx.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Unsupported or malformed location: {0}")]
    InvalidUrl(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Map an HTTP status to an error, or `None` for success codes.
    pub fn from_status(status: u16, target: &str) -> Option<Self> {
        match status {
            200..=299 => None,
            404 | 410 => Some(Self::NotFound(target.to_string())),
            401 | 403 => Some(Self::Forbidden(target.to_string())),
            400..=499 => Some(Self::Rejected {
                status,
                target: target.to_string(),
            }),
            _ => Some(Self::Unavailable(format!("HTTP {status} from {target}"))),
        }
    }
}
