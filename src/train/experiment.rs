//! Run directory lifecycle.
//!
//! An [`ExperimentRun`] is opened (fresh or existing), accumulates
//! checkpoints while training, and is closed with an outcome that decides
//! whether the directory survives.

use crate::config::Config;
use crate::error::{Result, TtsError};
use crate::train::checkpoint::Checkpoint;
use crate::train::storage::RunStorage;
use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const CONFIG_FILE: &str = "config.yaml";

/// How a training session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Interrupted,
    /// A fatal error inside the loop; existing checkpoints are kept.
    Failed,
}

/// What happened to the run directory on close.
#[derive(Debug)]
pub enum ClosedRun {
    Retained { dir: PathBuf, checkpoints: Vec<u64> },
    Deleted { reason: TtsError },
}

impl ClosedRun {
    pub fn is_deleted(&self) -> bool {
        matches!(self, Self::Deleted { .. })
    }
}

pub struct ExperimentRun {
    storage: Arc<dyn RunStorage>,
    dir: PathBuf,
    config: Config,
    checkpoints: Vec<u64>,
}

impl std::fmt::Debug for ExperimentRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentRun")
            .field("dir", &self.dir)
            .field("checkpoints", &self.checkpoints)
            .finish_non_exhaustive()
    }
}

impl ExperimentRun {
    /// Allocate `<output_path>/<run_name>-<timestamp>` and store the config in it.
    pub fn create(storage: Arc<dyn RunStorage>, config: Config) -> Result<Self> {
        let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
        let base = Path::new(&config.output_path).join(format!("{}-{stamp}", config.run_name));
        let mut dir = base.clone();
        let mut suffix = 1;
        while storage.exists(&dir) {
            dir = PathBuf::from(format!("{}-{suffix}", base.display()));
            suffix += 1;
        }
        storage.create_dir_all(&dir)?;
        storage.write_atomic(&dir.join(CONFIG_FILE), config.to_yaml()?.as_bytes())?;
        tracing::info!(dir = %dir.display(), "created run directory");
        Ok(Self {
            storage,
            dir,
            config,
            checkpoints: Vec::new(),
        })
    }

    /// Re-open an existing run directory.
    pub fn open(storage: Arc<dyn RunStorage>, dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let config_path = dir.join(CONFIG_FILE);
        let yaml = String::from_utf8(storage.read(&config_path)?)
            .map_err(|e| TtsError::Config(format!("{}: {e}", config_path.display())))?;
        let config = Config::from_yaml_str(&yaml)?;
        let mut checkpoints: Vec<u64> = storage
            .list(&dir)?
            .iter()
            .filter_map(|name| Checkpoint::parse_file_name(name))
            .collect();
        checkpoints.sort_unstable();
        tracing::info!(dir = %dir.display(), checkpoints = checkpoints.len(), "opened run directory");
        Ok(Self {
            storage,
            dir,
            config,
            checkpoints,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replace the stored config, e.g. to extend `epochs` on resume.
    pub fn update_config(&mut self, config: Config) -> Result<()> {
        self.storage
            .write_atomic(&self.dir.join(CONFIG_FILE), config.to_yaml()?.as_bytes())?;
        self.config = config;
        Ok(())
    }

    pub fn storage(&self) -> &Arc<dyn RunStorage> {
        &self.storage
    }

    /// Steps of the checkpoints written so far, ascending.
    pub fn checkpoint_steps(&self) -> &[u64] {
        &self.checkpoints
    }

    pub fn has_checkpoint(&self) -> bool {
        !self.checkpoints.is_empty()
    }

    pub fn checkpoint_path(&self, step: u64) -> PathBuf {
        self.dir.join(Checkpoint::file_name(step))
    }

    /// Load the newest checkpoint. A corrupt newest checkpoint is an error,
    /// not a reason to fall back to an older one.
    pub fn latest_checkpoint(&self) -> Result<Option<Checkpoint>> {
        let Some(&step) = self.checkpoints.last() else {
            return Ok(None);
        };
        Checkpoint::read(self.storage.as_ref(), &self.checkpoint_path(step)).map(Some)
    }

    pub fn save_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<PathBuf> {
        let step = checkpoint.position.step;
        let path = self.checkpoint_path(step);
        self.storage.write_atomic(&path, &checkpoint.to_bytes()?)?;
        if let Err(index) = self.checkpoints.binary_search(&step) {
            self.checkpoints.insert(index, step);
        }
        tracing::info!(step, path = %path.display(), "wrote checkpoint");
        Ok(path)
    }

    /// Apply the cleanup rule: an interrupted run with no checkpoint is removed.
    pub fn close(self, outcome: RunOutcome) -> Result<ClosedRun> {
        if outcome == RunOutcome::Interrupted && self.checkpoints.is_empty() {
            self.storage.remove_dir_all(&self.dir)?;
            let reason = TtsError::InterruptedNoCheckpoint { run_dir: self.dir };
            tracing::info!(%reason, "deleted run directory");
            return Ok(ClosedRun::Deleted { reason });
        }
        tracing::info!(dir = %self.dir.display(), ?outcome, checkpoints = self.checkpoints.len(), "closed run");
        Ok(ClosedRun::Retained {
            dir: self.dir,
            checkpoints: self.checkpoints,
        })
    }
}
