//! Error kinds surfaced by the detection pipeline and record store.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Failure of a pipeline stage.
///
/// `Decode` and `InferenceOutput` abort a detection run. `Io` aborts the stage that raised it,
/// though the record assembler downgrades crop I/O failures to a missing crop.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("inference output unavailable: {0}")]
    InferenceOutput(String),
    #[error("{0}")]
    Validation(String),
    #[error("malformed service response: {0}")]
    Response(String),
    #[error("record store error: {0}")]
    Store(#[from] rusqlite::Error),
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    /// Classify an `image` crate failure: unreadable files are `Io`, bad content is `Decode`.
    pub fn from_image(path: impl Into<PathBuf>, err: image::ImageError) -> Self {
        let path = path.into();
        match err {
            image::ImageError::IoError(source) => PipelineError::Io { path, source },
            other => PipelineError::Decode(format!("{}: {other}", path.display())),
        }
    }

    /// Returns `true` for failures that end a detection run.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            PipelineError::Decode(_) | PipelineError::InferenceOutput(_) | PipelineError::Io { .. }
        )
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
