//! Acoustic model: encoder, attention decoder, post-net and training loss.

pub mod decoder;
pub mod encoder;
pub mod loss;
pub mod mask;
pub mod postnet;
pub mod tacotron;

use crate::error::TtsError;

pub use tacotron::{InferenceOptions, Tacotron, TacotronConfig, TacotronOutput};

/// Result of free-running decoding.
///
/// A timeout still carries the frames produced before the step bound so the
/// caller can decide whether to use them.
#[derive(Debug)]
pub enum Decoded<T> {
    Complete(T),
    TimedOut { partial: T, error: TtsError },
}

impl<T> Decoded<T> {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }

    /// The output regardless of how decoding ended.
    pub fn output(&self) -> &T {
        match self {
            Self::Complete(output) | Self::TimedOut { partial: output, .. } => output,
        }
    }

    pub fn into_output(self) -> T {
        match self {
            Self::Complete(output) | Self::TimedOut { partial: output, .. } => output,
        }
    }

    /// Complete output, or the timeout error.
    pub fn into_result(self) -> Result<T, TtsError> {
        match self {
            Self::Complete(output) => Ok(output),
            Self::TimedOut { error, .. } => Err(error),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Decoded<U> {
        match self {
            Self::Complete(output) => Decoded::Complete(f(output)),
            Self::TimedOut { partial, error } => Decoded::TimedOut {
                partial: f(partial),
                error,
            },
        }
    }
}
