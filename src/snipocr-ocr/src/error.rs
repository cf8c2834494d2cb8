use thiserror::Error;

#[derive(Error, Debug)]
pub enum OcrError {
    /// Transport failure or non-success status from a remote backend
    #[error("network error: {0}")]
    Network(String),

    /// The backend reported a processing failure; message is the backend's own
    #[error("{0}")]
    Backend(String),

    #[error("unsupported image: {0}")]
    UnsupportedImage(String),

    #[error("backend configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for OcrError {
    fn from(e: reqwest::Error) -> Self {
        OcrError::Network(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OcrError>;
