//! Training loop over an [`ExperimentRun`].
//!
//! The loop is the only owner of the model and optimizer. Loader threads
//! prepare batches ahead of it; the interrupt flag is read at the top of
//! every step, before the next batch is taken, so a checkpoint write is
//! never in flight when the loop exits.

use crate::audio::{AudioProcessor, Spectrogram, Waveform};
use crate::config::Config;
use crate::data::{
    encode_dataset, epoch_plan, split_eval, Batch, BatchLoader, Dataset, EncodedExample,
    LoaderContext,
};
use crate::error::{Result, TtsError};
use crate::model::loss::{LossValues, TacotronLoss};
use crate::model::{Tacotron, TacotronConfig, TacotronOutput};
use crate::perf::{self, Metric};
use crate::text::TextEncoder;
use crate::train::checkpoint::{encode_record, Checkpoint, TrainingPosition};
use crate::train::events::{AlignmentSnapshot, EventSink, TrainingEvent};
use crate::train::experiment::{ClosedRun, ExperimentRun, RunOutcome};
use burn::module::{AutodiffModule, Module};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use burn_optim::grad_clipping::GradientClippingConfig;
use burn_optim::{AdamConfig, GradientsParams, Optimizer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lifecycle of a training session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Running,
    Checkpointing,
    Completed,
    Interrupted,
}

/// Summary returned by [`Trainer::fit`].
#[derive(Debug)]
pub struct TrainingReport {
    pub outcome: RunOutcome,
    pub position: TrainingPosition,
    pub last_loss: Option<LossValues>,
    /// Phase transitions in order.
    pub phases: Vec<Phase>,
    pub run: ClosedRun,
}

/// Learning rate for 1-based `step`: constant, or Noam warm-up then inverse
/// square-root decay when `warmup_steps > 0`.
pub fn learning_rate(base: f64, warmup_steps: usize, step: u64) -> f64 {
    if warmup_steps == 0 {
        return base;
    }
    let warmup = warmup_steps as f64;
    let step = step.max(1) as f64;
    base * warmup.sqrt() * (step * warmup.powf(-1.5)).min(step.powf(-0.5))
}

/// Example 0 of the latest batch, kept off the autodiff graph for snapshots.
struct Snapshot<B: Backend> {
    alignment: Tensor<B, 2>,
    linear: Tensor<B, 2>,
}

impl<B: Backend> Snapshot<B> {
    fn capture<AB: AutodiffBackend<InnerBackend = B>>(
        output: &TacotronOutput<AB>,
        batch: &Batch,
        r: usize,
    ) -> Self {
        let text_len = batch.text_lengths[0];
        let frames = batch.frame_lengths[0];
        let steps = frames.div_ceil(r);
        let num_freq = output.linear.dims()[2];
        Self {
            alignment: output
                .alignments
                .clone()
                .inner()
                .narrow(0, 0, 1)
                .narrow(1, 0, steps)
                .narrow(2, 0, text_len)
                .reshape([steps, text_len]),
            linear: output
                .linear
                .clone()
                .inner()
                .narrow(0, 0, 1)
                .narrow(1, 0, frames)
                .reshape([frames, num_freq]),
        }
    }

    fn alignment(&self) -> Result<AlignmentSnapshot> {
        let [decoder_steps, encoder_steps] = self.alignment.dims();
        let weights = self
            .alignment
            .clone()
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| TtsError::shape("alignment snapshot", format!("{e:?}")))?;
        Ok(AlignmentSnapshot {
            decoder_steps,
            encoder_steps,
            weights,
        })
    }

    fn waveform(&self, processor: &AudioProcessor) -> Result<Waveform> {
        let [frames, channels] = self.linear.dims();
        let values = self
            .linear
            .clone()
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| TtsError::shape("audio snapshot", format!("{e:?}")))?;
        processor.synthesize(&Spectrogram::new(values, frames, channels)?)
    }
}

struct LoopEnd {
    outcome: RunOutcome,
    position: TrainingPosition,
    last_loss: Option<LossValues>,
}

/// Drives one training session of a run directory, starting fresh or from
/// its newest checkpoint.
pub struct Trainer<B: AutodiffBackend> {
    run: ExperimentRun,
    dataset: Arc<dyn Dataset>,
    device: B::Device,
    sinks: Vec<Box<dyn EventSink>>,
    interrupt: Arc<AtomicBool>,
    phases: Vec<Phase>,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(run: ExperimentRun, dataset: Arc<dyn Dataset>, device: B::Device) -> Self {
        Self {
            run,
            dataset,
            device,
            sinks: Vec::new(),
            interrupt: Arc::new(AtomicBool::new(false)),
            phases: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Flag polled at the top of every step; setting it ends the session.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    /// Train until the configured epoch count or an interrupt.
    ///
    /// Interrupting a run that has no checkpoint deletes its directory and
    /// still returns `Ok`. Errors inside the loop close the run as failed,
    /// keeping every checkpoint already written.
    pub fn fit(mut self) -> Result<TrainingReport> {
        let result = self.run_loop();
        for sink in &mut self.sinks {
            if let Err(err) = sink.flush() {
                tracing::warn!(error = %err, "event sink flush failed");
            }
        }
        let outcome = match &result {
            Ok(end) => end.outcome,
            Err(err) => {
                tracing::error!(error = %err, "training failed");
                RunOutcome::Failed
            }
        };
        let closed = self.run.close(outcome)?;
        let end = result?;
        Ok(TrainingReport {
            outcome: end.outcome,
            position: end.position,
            last_loss: end.last_loss,
            phases: self.phases,
            run: closed,
        })
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phases.last() != Some(&phase) {
            tracing::info!(?phase, "training phase");
            self.phases.push(phase);
        }
    }

    fn emit(&mut self, event: TrainingEvent) {
        for sink in &mut self.sinks {
            if let Err(err) = sink.emit(&event) {
                tracing::warn!(error = %err, step = event.step(), "event sink failed");
            }
        }
    }

    fn run_loop(&mut self) -> Result<LoopEnd> {
        self.set_phase(Phase::Starting);
        let config = self.run.config().clone();
        config.validate()?;
        let encoder = TextEncoder::from_name(&config.text_cleaner)?;
        let examples = encode_dataset(
            self.dataset.as_ref(),
            &encoder,
            config.min_seq_len,
            config.max_seq_len,
        )?;
        let (train, eval) = split_eval(examples, config.eval_split, config.seed);
        if train.is_empty() {
            return Err(TtsError::Dataset("no usable training examples".to_string()));
        }

        let mut model = TacotronConfig::from_config(&config, encoder.vocab_size()).init::<B>(&self.device);
        let mut optim = AdamConfig::new()
            .with_grad_clipping(
                (config.grad_clip > 0.0).then(|| GradientClippingConfig::Norm(config.grad_clip)),
            )
            .init::<B, Tacotron<B>>();
        let mut position = TrainingPosition {
            step: 0,
            epoch: 0,
            epoch_step: 0,
        };
        let latest = {
            let _span = perf::span(Metric::CheckpointLoad);
            self.run.latest_checkpoint()?
        };
        if let Some(checkpoint) = latest {
            model = model.load_record(checkpoint.model_record::<B, _>(&self.device)?);
            optim = optim.load_record(checkpoint.optimizer_record::<B, _>(&self.device)?);
            position = checkpoint.position;
            tracing::info!(
                step = position.step,
                epoch = position.epoch,
                epoch_step = position.epoch_step,
                "resuming from checkpoint"
            );
        }

        let processor = Arc::new(AudioProcessor::from_config(&config));
        let train = Arc::new(train);
        let eval = Arc::new(eval);
        let context = LoaderContext {
            dataset: Arc::clone(&self.dataset),
            processor: Arc::clone(&processor),
            examples: Arc::clone(&train),
            r: config.r,
        };
        tracing::info!(
            train = train.len(),
            eval = eval.len(),
            epochs = config.epochs,
            "training examples ready"
        );

        self.set_phase(Phase::Running);
        let mut last_loss = None;
        let mut snapshot: Option<Snapshot<B::InnerBackend>> = None;
        let first_epoch = position.epoch;
        for epoch in first_epoch..config.epochs {
            let plan = epoch_plan(
                &train,
                config.batch_size,
                config.batch_group_size,
                config.seed,
                epoch,
            );
            let start = if epoch == first_epoch {
                position.epoch_step
            } else {
                0
            };
            position.epoch = epoch;
            position.epoch_step = start;
            let mut loader = BatchLoader::spawn(
                context.clone(),
                plan,
                start,
                config.num_loader_workers,
                config.queue_capacity,
            );
            loop {
                if self.interrupt.load(Ordering::SeqCst) {
                    self.set_phase(Phase::Interrupted);
                    tracing::info!(step = position.step, "interrupt received");
                    return Ok(LoopEnd {
                        outcome: RunOutcome::Interrupted,
                        position,
                        last_loss,
                    });
                }
                let Some(loaded) = loader.next() else {
                    break;
                };
                let loaded = loaded?;
                position.epoch_step = loaded.position + 1;
                let Some(batch) = loaded.batch else {
                    continue;
                };

                let step = position.step + 1;
                let lr = learning_rate(config.lr, config.warmup_steps, step);
                let span = perf::span(Metric::TrainStep);
                let tensors = batch.to_tensors::<B>(&self.device);
                let output = model.forward(
                    tensors.text,
                    &batch.text_lengths,
                    tensors.mel.clone(),
                    &batch.frame_lengths,
                )?;
                let loss = TacotronLoss::compute(
                    &output,
                    tensors.mel,
                    tensors.linear,
                    &batch.frame_lengths,
                    config.r,
                )?;
                let values = loss.values();
                // A non-finite loss still consumes its step so the checkpoint
                // cadence stays tied to the epoch plan.
                let finite = values.total.is_finite();
                if finite {
                    let grads = GradientsParams::from_grads(loss.total.backward(), &model);
                    model = optim.step(lr, model, grads);
                } else {
                    tracing::warn!(step, loss = values.total, "non-finite loss, skipping update");
                }
                drop(span);

                position.step = step;
                if finite {
                    perf::add_count(Metric::TrainedExamples, batch.len() as u64);
                    snapshot = Some(Snapshot::capture(&output, &batch, config.r));
                    last_loss = Some(values);
                    tracing::debug!(step, epoch, loss = values.total, "train step");
                }

                if finite && step % config.print_step == 0 {
                    for (name, value) in [
                        ("loss", values.total),
                        ("mel_loss", values.mel),
                        ("linear_loss", values.linear),
                        ("stop_loss", values.stop),
                        ("lr", lr as f32),
                    ] {
                        self.emit(TrainingEvent::Scalar { step, name, value });
                    }
                }
                if config.checkpoint && step % config.save_step == 0 {
                    self.write_checkpoint(&model, &optim, position, &config)?;
                    self.emit_snapshot(step, snapshot.as_ref(), &processor);
                    self.set_phase(Phase::Running);
                }
            }
            position.epoch = epoch + 1;
            position.epoch_step = 0;
            tracing::info!(epoch, step = position.step, "epoch finished");

            if !eval.is_empty() {
                let context = LoaderContext {
                    examples: Arc::clone(&eval),
                    ..context.clone()
                };
                if let Some(values) = self.evaluate(&model, context, &config)? {
                    self.emit(TrainingEvent::Scalar {
                        step: position.step,
                        name: "eval_loss",
                        value: values.total,
                    });
                }
            }
        }

        if self.run.checkpoint_steps().last() != Some(&position.step) {
            self.write_checkpoint(&model, &optim, position, &config)?;
            self.emit_snapshot(position.step, snapshot.as_ref(), &processor);
        }
        self.set_phase(Phase::Completed);
        Ok(LoopEnd {
            outcome: RunOutcome::Completed,
            position,
            last_loss,
        })
    }

    fn write_checkpoint<O: Optimizer<Tacotron<B>, B>>(
        &mut self,
        model: &Tacotron<B>,
        optim: &O,
        position: TrainingPosition,
        config: &Config,
    ) -> Result<()> {
        self.set_phase(Phase::Checkpointing);
        let _span = perf::span(Metric::CheckpointWrite);
        let checkpoint = Checkpoint::new(
            position,
            config.clone(),
            encode_record::<B, _>(model.clone().into_record())?,
            encode_record::<B, _>(optim.to_record())?,
        );
        self.run.save_checkpoint(&checkpoint)?;
        Ok(())
    }

    fn emit_snapshot(
        &mut self,
        step: u64,
        snapshot: Option<&Snapshot<B::InnerBackend>>,
        processor: &AudioProcessor,
    ) {
        let Some(snapshot) = snapshot else {
            return;
        };
        match snapshot.alignment() {
            Ok(alignment) => self.emit(TrainingEvent::Alignment { step, alignment }),
            Err(err) => tracing::warn!(step, error = %err, "alignment snapshot failed"),
        }
        match snapshot.waveform(processor) {
            Ok(waveform) => self.emit(TrainingEvent::Audio { step, waveform }),
            Err(err) => tracing::warn!(step, error = %err, "audio snapshot failed"),
        }
    }

    /// Mean loss over the held-out examples, weighted by batch size.
    fn evaluate(
        &self,
        model: &Tacotron<B>,
        context: LoaderContext,
        config: &Config,
    ) -> Result<Option<LossValues>> {
        let model = model.valid();
        let plan: Vec<Vec<usize>> = (0..context.examples.len())
            .collect::<Vec<_>>()
            .chunks(config.batch_size)
            .map(<[usize]>::to_vec)
            .collect();
        let loader = BatchLoader::spawn(
            context,
            plan,
            0,
            config.num_loader_workers,
            config.queue_capacity,
        );
        let mut totals = [0.0f32; 4];
        let mut count = 0usize;
        for loaded in loader {
            let Some(batch) = loaded?.batch else {
                continue;
            };
            let tensors = batch.to_tensors::<B>(&self.device);
            let output = model.forward(
                tensors.text.inner(),
                &batch.text_lengths,
                tensors.mel.clone().inner(),
                &batch.frame_lengths,
            )?;
            let values = TacotronLoss::compute(
                &output,
                tensors.mel.inner(),
                tensors.linear.inner(),
                &batch.frame_lengths,
                config.r,
            )?
            .values();
            let weight = batch.len() as f32;
            for (total, value) in totals
                .iter_mut()
                .zip([values.total, values.mel, values.linear, values.stop])
            {
                *total += value * weight;
            }
            count += batch.len();
        }
        if count == 0 {
            return Ok(None);
        }
        let n = count as f32;
        let values = LossValues {
            total: totals[0] / n,
            mel: totals[1] / n,
            linear: totals[2] / n,
            stop: totals[3] / n,
        };
        tracing::info!(examples = count, loss = values.total, "evaluation");
        Ok(Some(values))
    }
}
