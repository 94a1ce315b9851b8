use std::path::PathBuf;

use thiserror::Error;

/// Failures raised while loading inputs, matching, scoring or tuning.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot decode image {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("malformed depth raster: {0}")]
    Format(String),
    #[error("shape mismatch: {left:?} vs {right:?}")]
    ShapeMismatch { left: Vec<usize>, right: Vec<usize> },
    #[error("invalid stereo pair: {0}")]
    TypeMismatch(String),
    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),
    #[error("every trial failed ({skipped} skipped)")]
    ExhaustedSearchSpace { skipped: usize },
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True when a single tuning trial may fail with this error without
    /// aborting the whole run.
    pub fn is_trial_recoverable(&self) -> bool {
        matches!(self, Error::ConfigurationInvalid(_))
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::ConfigurationInvalid(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
