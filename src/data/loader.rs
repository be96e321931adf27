//! Parallel batch preparation feeding a single consumer.
//!
//! Workers claim plan positions from a shared window, load and analyze the
//! audio, collate, and send the result through a bounded channel. The
//! consumer re-orders by plan position, so batches come out exactly once
//! and in plan order regardless of which worker finished first.
//!
//! A position may only be claimed once it is within `capacity` of the next
//! position the consumer will yield, so claimed-but-unconsumed batches never
//! exceed `capacity` even when one batch is slow.

use crate::audio::AudioProcessor;
use crate::data::batch::{AnalyzedExample, Batch, EncodedExample};
use crate::data::dataset::Dataset;
use crate::error::{Result, TtsError};
use crate::perf::{self, Metric};
use std::collections::BTreeMap;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

/// One plan position after loading. `batch` is `None` when every example in
/// it failed to load.
#[derive(Debug)]
pub struct LoadedBatch {
    /// Position in the epoch plan.
    pub position: usize,
    pub batch: Option<Batch>,
}

/// Shared inputs for loader workers.
#[derive(Clone)]
pub struct LoaderContext {
    pub dataset: Arc<dyn Dataset>,
    pub processor: Arc<AudioProcessor>,
    pub examples: Arc<Vec<EncodedExample>>,
    pub r: usize,
}

#[derive(Debug)]
struct WindowState {
    /// Next position a worker may claim.
    claim: usize,
    /// Next position the consumer will yield.
    consumed: usize,
    closed: bool,
}

/// Claim window shared by the workers and the consumer.
#[derive(Debug)]
struct ClaimWindow {
    state: Mutex<WindowState>,
    changed: Condvar,
    capacity: usize,
    end: usize,
}

impl ClaimWindow {
    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Block until a position is claimable; `None` once the plan is exhausted
    /// or the loader is dropped.
    fn claim(&self) -> Option<usize> {
        let mut state = self.lock();
        loop {
            if state.closed || state.claim >= self.end {
                return None;
            }
            if state.claim < state.consumed + self.capacity {
                let position = state.claim;
                state.claim += 1;
                return Some(position);
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn advance(&self, consumed: usize) {
        self.lock().consumed = consumed;
        self.changed.notify_all();
    }

    fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_all();
    }
}

/// Iterator over the batches of one epoch plan.
pub struct BatchLoader {
    receiver: Option<Receiver<(usize, Result<Option<Batch>>)>>,
    pending: BTreeMap<usize, Result<Option<Batch>>>,
    window: Arc<ClaimWindow>,
    next: usize,
    end: usize,
    workers: Vec<JoinHandle<()>>,
}

impl BatchLoader {
    /// Start loading `plan[start..]` on `num_workers` threads with at most
    /// `capacity` batches claimed ahead of the consumer.
    pub fn spawn(
        context: LoaderContext,
        plan: Vec<Vec<usize>>,
        start: usize,
        num_workers: usize,
        capacity: usize,
    ) -> Self {
        let end = plan.len();
        let start = start.min(end);
        let capacity = capacity.max(1);
        let plan = Arc::new(plan);
        let window = Arc::new(ClaimWindow {
            state: Mutex::new(WindowState {
                claim: start,
                consumed: start,
                closed: false,
            }),
            changed: Condvar::new(),
            capacity,
            end,
        });
        let (sender, receiver) = sync_channel(capacity);
        let workers = (0..num_workers.max(1))
            .map(|_| {
                let context = context.clone();
                let plan = Arc::clone(&plan);
                let window = Arc::clone(&window);
                let sender = sender.clone();
                std::thread::spawn(move || worker(context, plan, window, sender))
            })
            .collect();
        Self {
            receiver: Some(receiver),
            pending: BTreeMap::new(),
            window,
            next: start,
            end,
            workers,
        }
    }
}

fn worker(
    context: LoaderContext,
    plan: Arc<Vec<Vec<usize>>>,
    window: Arc<ClaimWindow>,
    sender: SyncSender<(usize, Result<Option<Batch>>)>,
) {
    while let Some(position) = window.claim() {
        let Some(members) = plan.get(position) else {
            return;
        };
        let result = build_batch(&context, members);
        if sender.send((position, result)).is_err() {
            return;
        }
    }
}

fn build_batch(context: &LoaderContext, members: &[usize]) -> Result<Option<Batch>> {
    let _span = perf::span(Metric::LoaderBatch);
    let mut items = Vec::with_capacity(members.len());
    for &member in members {
        let example = context.examples.get(member).ok_or_else(|| {
            TtsError::Dataset(format!("plan refers to missing example {member}"))
        })?;
        let analyzed = context
            .dataset
            .load(example.index)
            .and_then(|sample| {
                let features = context.processor.analyze(&sample.audio)?;
                Ok(AnalyzedExample {
                    id: sample.id,
                    sequence: example.sequence.clone(),
                    features,
                })
            });
        match analyzed {
            Ok(item) => items.push(item),
            Err(err) if err.is_example_error() => {
                tracing::warn!(index = example.index, error = %err, "dropping example");
                perf::add_count(Metric::DroppedExamples, 1);
            }
            Err(err) => return Err(err),
        }
    }
    if items.is_empty() {
        return Ok(None);
    }
    Batch::collate(items, context.r).map(Some)
}

impl Iterator for BatchLoader {
    type Item = Result<LoadedBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let receiver = self.receiver.as_ref()?;
        while !self.pending.contains_key(&self.next) {
            match receiver.recv() {
                Ok((position, result)) => {
                    self.pending.insert(position, result);
                }
                Err(_) => {
                    self.next = self.end;
                    return Some(Err(TtsError::Dataset(
                        "loader workers stopped before the plan was complete".to_string(),
                    )));
                }
            }
        }
        let position = self.next;
        self.next += 1;
        self.window.advance(self.next);
        let result = self.pending.remove(&position)?;
        Some(result.map(|batch| LoadedBatch { position, batch }))
    }
}

impl Drop for BatchLoader {
    fn drop(&mut self) {
        // Closing the window and the channel unblocks every waiting worker.
        self.window.close();
        self.receiver.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Waveform;
    use crate::config::Config;
    use crate::data::batch::encode_dataset;
    use crate::data::dataset::{InMemoryDataset, Sample};
    use crate::text::TextEncoder;

    fn samples(count: usize) -> InMemoryDataset {
        InMemoryDataset::new(
            (0..count)
                .map(|i| Sample {
                    id: format!("s{i}"),
                    text: "a".repeat(i + 1),
                    audio: Waveform::new(vec![0.1; 400 + 64 * i], 8000),
                })
                .collect(),
        )
    }

    fn context(samples_count: usize) -> LoaderContext {
        context_for(Arc::new(samples(samples_count)))
    }

    fn context_for(dataset: Arc<dyn Dataset>) -> LoaderContext {
        let config = Config {
            sample_rate: 8000,
            num_freq: 65,
            num_mels: 8,
            frame_length_ms: 16.0,
            frame_shift_ms: 8.0,
            ..Config::default()
        };
        let encoder = TextEncoder::from_name("basic_cleaners").expect("encoder");
        let examples = encode_dataset(dataset.as_ref(), &encoder, 1, 100).expect("encode");
        LoaderContext {
            dataset,
            processor: Arc::new(AudioProcessor::from_config(&config)),
            examples: Arc::new(examples),
            r: 2,
        }
    }

    #[test]
    fn yields_every_batch_once_in_plan_order() {
        let plan = vec![vec![3, 1], vec![0], vec![5, 2], vec![4]];
        let loader = BatchLoader::spawn(context(6), plan.clone(), 0, 3, 1);
        let loaded: Vec<LoadedBatch> = loader.map(|b| b.expect("batch")).collect();
        let positions: Vec<usize> = loaded.iter().map(|b| b.position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3]);
        for (loaded, members) in loaded.iter().zip(&plan) {
            let batch = loaded.batch.as_ref().expect("non-empty");
            let ids: Vec<String> = members.iter().map(|m| format!("s{m}")).collect();
            assert_eq!(batch.ids, ids);
            assert_eq!(batch.frames % 2, 0);
        }
    }

    /// Item 0 takes long enough for every other worker to run ahead.
    struct SlowFirst(InMemoryDataset);

    impl Dataset for SlowFirst {
        fn len(&self) -> usize {
            self.0.len()
        }

        fn transcript(&self, index: usize) -> Result<String> {
            self.0.transcript(index)
        }

        fn load(&self, index: usize) -> Result<Sample> {
            if index == 0 {
                std::thread::sleep(std::time::Duration::from_millis(300));
            }
            self.0.load(index)
        }
    }

    #[test]
    fn slow_batch_does_not_let_workers_run_ahead() {
        let capacity = 2;
        let context = context_for(Arc::new(SlowFirst(samples(30))));
        let plan: Vec<Vec<usize>> = (0..30).map(|i| vec![i]).collect();
        let mut loader = BatchLoader::spawn(context, plan, 0, 4, capacity);
        let mut positions = Vec::new();
        while let Some(loaded) = loader.next() {
            assert!(
                loader.pending.len() < capacity,
                "{} batches buffered with capacity {capacity}",
                loader.pending.len()
            );
            positions.push(loaded.expect("batch").position);
        }
        assert_eq!(positions, (0..30).collect::<Vec<_>>());
    }

    #[test]
    fn resumes_from_a_plan_position() {
        let plan = vec![vec![0], vec![1], vec![2]];
        let loader = BatchLoader::spawn(context(3), plan, 2, 2, 2);
        let positions: Vec<usize> = loader.map(|b| b.expect("batch").position).collect();
        assert_eq!(positions, vec![2]);
    }

    #[test]
    fn dropping_early_stops_workers() {
        let plan: Vec<Vec<usize>> = (0..6).map(|i| vec![i]).collect();
        let mut loader = BatchLoader::spawn(context(6), plan, 0, 2, 1);
        assert!(loader.next().is_some());
        drop(loader);
    }
}
