//! Experiment runs, checkpoints and the training loop.

pub mod checkpoint;
pub mod events;
pub mod experiment;
pub mod storage;
pub mod trainer;

pub use checkpoint::{Checkpoint, TrainingPosition};
pub use events::{AlignmentSnapshot, EventSink, JsonLinesSink, MemorySink, TracingSink, TrainingEvent};
pub use experiment::{ClosedRun, ExperimentRun, RunOutcome};
pub use storage::{FsStorage, MemoryStorage, RunStorage};
pub use trainer::{learning_rate, Phase, Trainer, TrainingReport};
