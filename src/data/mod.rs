//! Training data: datasets, example selection, batching and parallel loading.

pub mod batch;
pub mod dataset;
pub mod loader;

pub use batch::{encode_dataset, epoch_plan, split_eval, Batch, BatchTensors, EncodedExample};
pub use dataset::{Dataset, InMemoryDataset, MetadataCsvDataset, Sample};
pub use loader::{BatchLoader, LoadedBatch, LoaderContext};
