/// Errors from artifact storage.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backend has no object under this key.
    #[error("artifact not found: {0}")]
    NotFound(String),

    /// The backend answered with an unexpected status.
    #[error("storage backend returned status {0}")]
    BadGateway(u16),

    /// An upload was refused by the backend.
    #[error("upload of {key} failed with status {status}: {body}")]
    Upload {
        key: String,
        status: u16,
        body: String,
    },

    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("storage request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
