//! Checkpoint container.
//!
//! A checkpoint is a SafeTensors file with two `U8` tensors, `model` and
//! `optimizer`, each holding a burn record serialized by `BinBytesRecorder`.
//! The header metadata carries the training position, the run config and a
//! SHA-256 digest of each blob.

use crate::config::Config;
use crate::error::{Result, TtsError};
use crate::train::storage::RunStorage;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Record, Recorder};
use burn::tensor::backend::Backend;
use safetensors::tensor::TensorView;
use safetensors::{serialize, Dtype, SafeTensors};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const MODEL_TENSOR: &str = "model";
const OPTIMIZER_TENSOR: &str = "optimizer";
const FORMAT_KEY: &str = "format";
const FORMAT_VALUE: &str = "tacotron-checkpoint-v1";

const FILE_PREFIX: &str = "checkpoint_";
const FILE_SUFFIX: &str = ".safetensors";

/// Where in training a checkpoint was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingPosition {
    /// Optimizer steps completed.
    pub step: u64,
    /// Epoch the next step belongs to.
    pub epoch: usize,
    /// Batches of `epoch` already consumed.
    pub epoch_step: usize,
}

/// A decoded checkpoint. Records stay serialized until a caller asks for them
/// on a specific backend; a record that then fails to decode is reported as
/// corruption of the file it came from.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub position: TrainingPosition,
    pub config: Config,
    model: Vec<u8>,
    optimizer: Vec<u8>,
    source: PathBuf,
}

/// Serialize any burn record at full precision.
pub fn encode_record<B: Backend, R: Record<B>>(record: R) -> Result<Vec<u8>> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    Recorder::<B>::record(&recorder, record, ()).map_err(|e| TtsError::Record(e.to_string()))
}

/// Inverse of [`encode_record`].
pub fn decode_record<B: Backend, R: Record<B>>(bytes: Vec<u8>, device: &B::Device) -> Result<R> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    Recorder::<B>::load(&recorder, bytes, device).map_err(|e| TtsError::Record(e.to_string()))
}

fn byte_view(bytes: &[u8]) -> Result<TensorView<'_>> {
    TensorView::new(Dtype::U8, vec![bytes.len()], bytes)
        .map_err(|e| TtsError::Record(format!("building checkpoint tensor: {e}")))
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

impl Checkpoint {
    pub fn new(
        position: TrainingPosition,
        config: Config,
        model: Vec<u8>,
        optimizer: Vec<u8>,
    ) -> Self {
        Self {
            position,
            config,
            model,
            optimizer,
            source: PathBuf::new(),
        }
    }

    /// `checkpoint_00001234.safetensors`
    pub fn file_name(step: u64) -> String {
        format!("{FILE_PREFIX}{step:08}{FILE_SUFFIX}")
    }

    /// Step encoded in a checkpoint file name, if it is one.
    pub fn parse_file_name(name: &str) -> Option<u64> {
        let digits = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    pub fn model_bytes(&self) -> &[u8] {
        &self.model
    }

    pub fn optimizer_bytes(&self) -> &[u8] {
        &self.optimizer
    }

    /// File the checkpoint was parsed from; empty for one built in memory.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Decode the model record for backend `B`.
    pub fn model_record<B: Backend, R: Record<B>>(&self, device: &B::Device) -> Result<R> {
        decode_record::<B, R>(self.model.clone(), device)
            .map_err(|e| TtsError::corrupt(&self.source, format!("model record: {e}")))
    }

    /// Decode the optimizer record for backend `B`.
    pub fn optimizer_record<B: Backend, R: Record<B>>(&self, device: &B::Device) -> Result<R> {
        decode_record::<B, R>(self.optimizer.clone(), device)
            .map_err(|e| TtsError::corrupt(&self.source, format!("optimizer record: {e}")))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut metadata = HashMap::new();
        metadata.insert(FORMAT_KEY.to_string(), FORMAT_VALUE.to_string());
        metadata.insert("step".to_string(), self.position.step.to_string());
        metadata.insert("epoch".to_string(), self.position.epoch.to_string());
        metadata.insert("epoch_step".to_string(), self.position.epoch_step.to_string());
        metadata.insert("config".to_string(), self.config.to_yaml()?);
        metadata.insert("model_sha256".to_string(), sha256_hex(&self.model));
        metadata.insert("optimizer_sha256".to_string(), sha256_hex(&self.optimizer));

        let mut tensors = HashMap::new();
        tensors.insert(MODEL_TENSOR.to_string(), byte_view(&self.model)?);
        tensors.insert(OPTIMIZER_TENSOR.to_string(), byte_view(&self.optimizer)?);
        serialize(&tensors, &Some(metadata))
            .map_err(|e| TtsError::Record(format!("serializing checkpoint: {e}")))
    }

    /// Parse and verify a checkpoint. `path` only labels errors.
    pub fn from_bytes(path: &Path, bytes: &[u8]) -> Result<Self> {
        let (_, header) =
            SafeTensors::read_metadata(bytes).map_err(|e| TtsError::corrupt(path, e))?;
        let metadata = header
            .metadata()
            .as_ref()
            .ok_or_else(|| TtsError::corrupt(path, "missing header metadata"))?;
        let field = |key: &str| {
            metadata
                .get(key)
                .ok_or_else(|| TtsError::corrupt(path, format!("missing metadata field {key:?}")))
        };
        if field(FORMAT_KEY)? != FORMAT_VALUE {
            return Err(TtsError::corrupt(path, "unrecognised checkpoint format"));
        }
        let number = |key: &str| -> Result<u64> {
            field(key)?
                .parse()
                .map_err(|e| TtsError::corrupt(path, format!("field {key:?}: {e}")))
        };
        let position = TrainingPosition {
            step: number("step")?,
            epoch: number("epoch")? as usize,
            epoch_step: number("epoch_step")? as usize,
        };
        let config = Config::from_yaml_str(field("config")?)
            .map_err(|e| TtsError::corrupt(path, format!("embedded config: {e}")))?;

        let tensors = SafeTensors::deserialize(bytes).map_err(|e| TtsError::corrupt(path, e))?;
        let blob = |name: &str, digest_key: &str| -> Result<Vec<u8>> {
            let tensor = tensors
                .tensor(name)
                .map_err(|e| TtsError::corrupt(path, format!("tensor {name:?}: {e}")))?;
            if tensor.dtype() != Dtype::U8 {
                return Err(TtsError::corrupt(path, format!("tensor {name:?} is not u8")));
            }
            let data = tensor.data();
            if sha256_hex(data) != *field(digest_key)? {
                return Err(TtsError::corrupt(path, format!("digest mismatch for {name:?}")));
            }
            Ok(data.to_vec())
        };
        Ok(Self {
            position,
            config,
            model: blob(MODEL_TENSOR, "model_sha256")?,
            optimizer: blob(OPTIMIZER_TENSOR, "optimizer_sha256")?,
            source: path.to_path_buf(),
        })
    }

    pub fn read(storage: &dyn RunStorage, path: &Path) -> Result<Self> {
        let bytes = storage.read(path)?;
        Self::from_bytes(path, &bytes)
    }

    /// Read a checkpoint file from the local filesystem.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| TtsError::io("reading checkpoint", e))?;
        Self::from_bytes(path, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Tacotron;
    use burn::module::Module;

    fn sample() -> Checkpoint {
        Checkpoint::new(
            TrainingPosition {
                step: 42,
                epoch: 3,
                epoch_step: 7,
            },
            Config::default(),
            vec![1, 2, 3, 4, 5],
            vec![9; 17],
        )
    }

    #[test]
    fn container_preserves_position_config_and_blobs() {
        let checkpoint = sample();
        let bytes = checkpoint.to_bytes().expect("serialize");
        let restored = Checkpoint::from_bytes(Path::new("mem"), &bytes).expect("parse");
        assert_eq!(restored.position, checkpoint.position);
        assert_eq!(restored.config, checkpoint.config);
        assert_eq!(restored.model_bytes(), &[1, 2, 3, 4, 5]);
        assert_eq!(restored.optimizer_bytes().len(), 17);
    }

    #[test]
    fn truncated_file_is_corrupt() {
        let bytes = sample().to_bytes().expect("serialize");
        let err = Checkpoint::from_bytes(Path::new("cut"), &bytes[..bytes.len() - 3])
            .expect_err("truncated");
        assert!(matches!(err, TtsError::CheckpointCorrupt { .. }), "{err}");
    }

    #[test]
    fn flipped_payload_byte_fails_digest() {
        let mut bytes = sample().to_bytes().expect("serialize");
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let err = Checkpoint::from_bytes(Path::new("flip"), &bytes).expect_err("digest");
        match err {
            TtsError::CheckpointCorrupt { message, .. } => assert!(message.contains("digest")),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn garbage_is_corrupt() {
        let err = Checkpoint::from_bytes(Path::new("junk"), b"not a checkpoint").expect_err("junk");
        assert!(matches!(err, TtsError::CheckpointCorrupt { .. }));
    }

    #[test]
    fn undecodable_record_is_corrupt() {
        type B = burn_ndarray::NdArray<f32>;
        let bytes = sample().to_bytes().expect("serialize");
        let checkpoint = Checkpoint::from_bytes(Path::new("blob"), &bytes).expect("digests match");
        let Err(err) = checkpoint
            .model_record::<B, <Tacotron<B> as Module<B>>::Record>(&Default::default())
        else {
            panic!("five bytes are not a model");
        };
        match err {
            TtsError::CheckpointCorrupt { path, message } => {
                assert_eq!(path, Path::new("blob"));
                assert!(message.starts_with("model record"), "{message}");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn file_names_sort_by_step() {
        assert_eq!(Checkpoint::file_name(7), "checkpoint_00000007.safetensors");
        assert_eq!(Checkpoint::parse_file_name("checkpoint_00000007.safetensors"), Some(7));
        assert_eq!(Checkpoint::parse_file_name("checkpoint_.safetensors"), None);
        assert_eq!(Checkpoint::parse_file_name("config.yaml"), None);
        assert_eq!(Checkpoint::parse_file_name("checkpoint_12.tmp"), None);
    }
}
