//! # tacotron - attention-based text-to-speech
//!
//! A text-to-spectrogram model with Griffin-Lim waveform synthesis and a
//! crash-safe training loop.
//!
//! ## Architecture Overview
//!
//! 1. **Text front-end** ([`TextEncoder`]): cleans raw text (number and
//!    abbreviation expansion, ASCII folding) and maps it to symbol indices.
//!
//! 2. **Spectral front-end** ([`AudioProcessor`]): pre-emphasis, STFT and a
//!    mel filter bank on the way in; Griffin-Lim phase reconstruction on the
//!    way out.
//!
//! 3. **Model** ([`Tacotron`]): a CBHG encoder, an attention decoder that emits
//!    `r` mel frames per step, and a CBHG post-net that predicts the linear
//!    spectrogram.
//!
//! 4. **Training** ([`train`]): parallel batch loading, masked losses, and
//!    run directories whose checkpoints are written atomically. A run
//!    interrupted before its first checkpoint is removed.
//!
//! ## Quick Start
//!
//! ```no_run
//! use burn_ndarray::{NdArray, NdArrayDevice};
//! use tacotron::runtime::Synthesizer;
//!
//! let device = NdArrayDevice::default();
//! let synthesizer =
//!     Synthesizer::<NdArray<f32>>::from_checkpoint("run/checkpoint_00002000.safetensors", &device)
//!         .unwrap();
//! let decoded = synthesizer.synthesize_text("Hello, Dr. Smith!").unwrap();
//! if let Err(err) = decoded.into_result() {
//!     eprintln!("decoder did not stop: {err}");
//! }
//! ```

pub mod audio;
pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod perf;
pub mod runtime;
pub mod state;
pub mod text;
pub mod train;

// Building blocks shared by the encoder, decoder and post-net.
#[doc(hidden)]
pub mod modules;

pub use audio::{AudioProcessor, Spectrogram, Waveform};
pub use config::{load_config, Config};
pub use error::{Result, TtsError};
pub use model::{Decoded, Tacotron, TacotronConfig};
pub use runtime::{Synthesis, Synthesizer};
pub use text::{TextEncoder, TextSequence};
