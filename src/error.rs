//! Error taxonomy shared by the front-ends, the model and the training loop.

use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = TtsError> = std::result::Result<T, E>;

/// Every failure the library can report.
#[derive(Debug, Error)]
pub enum TtsError {
    /// A character survived cleaning but has no vocabulary entry.
    #[error("unknown symbol {symbol:?} at character {position} of {text:?}")]
    UnknownSymbol {
        symbol: char,
        position: usize,
        text: String,
    },
    /// The cleaned text produced no symbols.
    #[error("text is empty after cleaning")]
    EmptyInput,
    /// Free-running decoding hit the step bound before a stop signal.
    #[error("decoder reached {max_steps} steps without a stop signal")]
    DecodingTimeout { max_steps: usize },
    /// Batch padding, masks or tensor shapes disagree.
    #[error("shape mismatch in {context}: {message}")]
    ShapeMismatch {
        context: &'static str,
        message: String,
    },
    /// A checkpoint could not be parsed or failed its digest check.
    #[error("checkpoint {path} is corrupt: {message}")]
    CheckpointCorrupt { path: PathBuf, message: String },
    /// The run was interrupted before any checkpoint existed.
    #[error("run {run_dir} interrupted before its first checkpoint")]
    InterruptedNoCheckpoint { run_dir: PathBuf },
    /// Invalid or inconsistent configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Audio decoding or resampling failure.
    #[error("audio error: {0}")]
    Audio(String),
    /// Dataset collaborator failure.
    #[error("dataset error: {0}")]
    Dataset(String),
    /// Model or optimizer record (de)serialization failure.
    #[error("record error: {0}")]
    Record(String),
    /// Run storage backend failure.
    #[error("storage error at {path}: {message}")]
    Storage { path: PathBuf, message: String },
    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl TtsError {
    pub(crate) fn shape(context: &'static str, message: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            context,
            message: message.into(),
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Self::CheckpointCorrupt {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Storage {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    /// Per-example front-end failures that the batching pipeline drops instead of failing.
    pub fn is_example_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownSymbol { .. } | Self::EmptyInput | Self::Audio(_)
        )
    }
}
