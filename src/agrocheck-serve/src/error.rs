use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures across the fetch, load, and inference stages. Display text is
/// what the HTTP layer exposes to clients for pipeline errors, so messages
/// stay concise and never name buckets or local paths.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to fetch model artifact")]
    Fetch(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to load model: {0}")]
    ModelLoad(#[source] tensorflow::Status),

    #[error("inference failed: {0}")]
    Inference(#[source] tensorflow::Status),

    #[error("invalid image data")]
    InvalidImage(#[from] image::ImageError),

    #[error("model output shape mismatch: expected {expected} classes, got {actual}")]
    OutputShape { expected: usize, actual: usize },
}
