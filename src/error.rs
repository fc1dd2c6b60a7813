use std::path::PathBuf;

use burn::record::RecorderError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("failed to record weights: {0:?}")]
    Recorder(RecorderError),

    #[error("no valid image files found in {0}")]
    NoImages(PathBuf),

    #[error("invalid architecture: {0}")]
    InvalidArchitecture(String),

    #[error("invalid noise settings: {0}")]
    InvalidNoise(String),

    #[error("could not read tensor data: {0}")]
    TensorData(String),
}

impl From<RecorderError> for Error {
    fn from(err: RecorderError) -> Self {
        Error::Recorder(err)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
