// Error types for imagent

use thiserror::Error;

/// Result type for remote generation calls
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Failure of a single remote generation or enhance call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The service answered with text instead of an image. Kept verbatim.
    #[error("{0}")]
    Explanation(String),

    #[error("no image data was returned by the service")]
    NoImage,

    #[error("transport: {0}")]
    Transport(String),

    #[error("service error ({status}): {message}")]
    Service { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RemoteError::Malformed(err.to_string())
        } else {
            RemoteError::Transport(err.to_string())
        }
    }
}

/// Errors raised while capturing or encoding images
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("unsupported image type '{0}', only PNG and JPEG are accepted")]
    Unsupported(String),

    #[error("invalid base64 image data: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
