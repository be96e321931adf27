mod common;

use burn::module::Module;
use burn::tensor::{Int, Tensor, TensorData};
use burn_ndarray::NdArrayDevice;
use burn_optim::{AdamConfig, GradientsParams, Optimizer};
use common::{tiny_config, toy_dataset, InterruptAt, TrainBackend};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tacotron::data::{Dataset, InMemoryDataset, Sample};
use tacotron::model::loss::TacotronLoss;
use tacotron::model::{Tacotron, TacotronConfig};
use tacotron::text::TextEncoder;
use tacotron::train::checkpoint::encode_record;
use tacotron::train::{
    Checkpoint, ClosedRun, ExperimentRun, MemoryStorage, MemorySink, Phase, RunOutcome,
    RunStorage, Trainer, TrainingEvent, TrainingPosition,
};
use tacotron::TtsError;

type Model = Tacotron<TrainBackend>;

fn trainer(run: ExperimentRun) -> Trainer<TrainBackend> {
    Trainer::<TrainBackend>::new(run, Arc::new(toy_dataset()), NdArrayDevice::default())
}

fn retained_steps(run: &ClosedRun) -> Vec<u64> {
    match run {
        ClosedRun::Retained { checkpoints, .. } => checkpoints.clone(),
        ClosedRun::Deleted { reason } => panic!("run was deleted: {reason}"),
    }
}

#[test]
fn uninterrupted_run_completes_with_periodic_checkpoints() {
    let storage = Arc::new(MemoryStorage::new());
    let run = ExperimentRun::create(storage.clone(), tiny_config("/runs")).expect("create");
    let sink = MemorySink::new();
    let report = trainer(run)
        .with_sink(Box::new(sink.clone()))
        .fit()
        .expect("fit");

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.position.step, 6);
    assert_eq!(report.position.epoch, 3);
    assert_eq!(retained_steps(&report.run), vec![2, 4, 6]);
    assert_eq!(report.phases.first(), Some(&Phase::Starting));
    assert!(report.phases.contains(&Phase::Checkpointing));
    assert_eq!(report.phases.last(), Some(&Phase::Completed));
    assert!(report.last_loss.expect("loss").total.is_finite());

    let events = sink.events();
    let alignments = events
        .iter()
        .filter(|e| matches!(e, TrainingEvent::Alignment { .. }))
        .count();
    let audio = events
        .iter()
        .filter(|e| matches!(e, TrainingEvent::Audio { .. }))
        .count();
    assert_eq!(alignments, 3, "one alignment snapshot per checkpoint");
    assert_eq!(audio, 3, "one audio snapshot per checkpoint");
    for event in &events {
        if let TrainingEvent::Alignment { alignment, .. } = event {
            for row in alignment.rows() {
                let sum: f32 = row.iter().sum();
                assert!((sum - 1.0).abs() < 1e-4, "alignment row sums to {sum}");
            }
        }
    }
}

#[test]
fn interrupt_before_first_checkpoint_deletes_run() {
    let storage = Arc::new(MemoryStorage::new());
    let run = ExperimentRun::create(storage.clone(), tiny_config("/runs")).expect("create");
    let dir = run.dir().to_path_buf();
    let flag = Arc::new(AtomicBool::new(false));
    let report = trainer(run)
        .with_interrupt(Arc::clone(&flag))
        .with_sink(Box::new(InterruptAt {
            step: 1,
            flag: Arc::clone(&flag),
        }))
        .fit()
        .expect("interrupt is not an error");

    assert_eq!(report.outcome, RunOutcome::Interrupted);
    assert_eq!(report.position.step, 1);
    match report.run {
        ClosedRun::Deleted { reason } => {
            assert!(matches!(reason, TtsError::InterruptedNoCheckpoint { .. }));
        }
        other => panic!("expected deletion, got {other:?}"),
    }
    assert!(!storage.exists(&dir));
    assert!(storage.files().is_empty(), "left {:?}", storage.files());
}

#[test]
fn interrupt_after_checkpoint_keeps_run_and_resume_matches_cadence() {
    let storage = Arc::new(MemoryStorage::new());
    let run = ExperimentRun::create(storage.clone(), tiny_config("/runs")).expect("create");
    let dir = run.dir().to_path_buf();
    let flag = Arc::new(AtomicBool::new(false));
    let report = trainer(run)
        .with_interrupt(Arc::clone(&flag))
        .with_sink(Box::new(InterruptAt {
            step: 3,
            flag: Arc::clone(&flag),
        }))
        .fit()
        .expect("fit");
    assert_eq!(report.outcome, RunOutcome::Interrupted);
    assert_eq!(report.position.step, 3);
    assert_eq!(retained_steps(&report.run), vec![2]);
    assert!(storage.exists(&dir.join(Checkpoint::file_name(2))));

    let reopened = ExperimentRun::open(storage.clone(), &dir).expect("open");
    let resumed = trainer(reopened).fit().expect("resume");
    assert_eq!(resumed.outcome, RunOutcome::Completed);
    assert_eq!(resumed.position.step, 6);
    assert_eq!(retained_steps(&resumed.run), vec![2, 4, 6]);

    let last = Checkpoint::read(storage.as_ref(), &dir.join(Checkpoint::file_name(6)))
        .expect("final checkpoint");
    assert_eq!(last.position.epoch, 2);
    assert_eq!(last.position.epoch_step, 2);
}

#[test]
fn resuming_a_completed_run_is_a_no_op() {
    let storage = Arc::new(MemoryStorage::new());
    let run = ExperimentRun::create(storage.clone(), tiny_config("/runs")).expect("create");
    let dir = run.dir().to_path_buf();
    trainer(run).fit().expect("first session");

    let reopened = ExperimentRun::open(storage.clone(), &dir).expect("open");
    let report = trainer(reopened).fit().expect("second session");
    assert_eq!(report.position.step, 6);
    assert_eq!(retained_steps(&report.run), vec![2, 4, 6]);
}

#[test]
fn corrupt_latest_checkpoint_refuses_to_resume() {
    let storage = Arc::new(MemoryStorage::new());
    let mut config = tiny_config("/runs");
    config.epochs = 1;
    let run = ExperimentRun::create(storage.clone(), config).expect("create");
    let dir = run.dir().to_path_buf();
    trainer(run).fit().expect("fit");

    let path = dir.join(Checkpoint::file_name(2));
    let mut bytes = storage.read(&path).expect("read");
    bytes.truncate(bytes.len() / 2);
    storage.put_raw(&path, bytes);

    let reopened = ExperimentRun::open(storage.clone(), &dir).expect("open");
    let err = trainer(reopened).fit().expect_err("corrupt");
    assert!(matches!(err, TtsError::CheckpointCorrupt { .. }), "{err}");
    assert!(storage.exists(&path), "a failed session keeps existing files");
}

/// Fails any item loaded for the second time.
struct FlakyDataset {
    inner: InMemoryDataset,
    loads: Mutex<HashMap<usize, usize>>,
}

impl Dataset for FlakyDataset {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn transcript(&self, index: usize) -> tacotron::Result<String> {
        self.inner.transcript(index)
    }

    fn load(&self, index: usize) -> tacotron::Result<Sample> {
        let mut loads = self.loads.lock().expect("lock");
        let count = loads.entry(index).or_insert(0);
        *count += 1;
        if *count > 1 {
            return Err(TtsError::Dataset(format!("disk went away reading {index}")));
        }
        self.inner.load(index)
    }
}

#[test]
fn fatal_error_keeps_existing_checkpoints() {
    let storage = Arc::new(MemoryStorage::new());
    let run = ExperimentRun::create(storage.clone(), tiny_config("/runs")).expect("create");
    let dir = run.dir().to_path_buf();
    let dataset = FlakyDataset {
        inner: toy_dataset(),
        loads: Mutex::new(HashMap::new()),
    };
    let err = Trainer::<TrainBackend>::new(run, Arc::new(dataset), NdArrayDevice::default())
        .fit()
        .expect_err("second epoch fails");
    assert!(matches!(err, TtsError::Dataset(_)), "{err}");
    assert!(storage.exists(&dir.join(Checkpoint::file_name(2))));
}

#[test]
fn unusable_dataset_is_reported() {
    let storage = Arc::new(MemoryStorage::new());
    let run = ExperimentRun::create(storage.clone(), tiny_config("/runs")).expect("create");
    let dataset = InMemoryDataset::new(vec![Sample {
        id: "x".to_string(),
        text: "   ".to_string(),
        audio: common::tone(200.0, 0.05),
    }]);
    let err = Trainer::<TrainBackend>::new(run, Arc::new(dataset), NdArrayDevice::default())
        .fit()
        .expect_err("nothing to train on");
    assert!(matches!(err, TtsError::Dataset(_)));
}

#[test]
fn zero_grad_clip_still_updates_parameters() {
    let storage = Arc::new(MemoryStorage::new());
    let mut config = tiny_config("/runs");
    config.grad_clip = 0.0;
    let run = ExperimentRun::create(storage.clone(), config).expect("create");
    let dir = run.dir().to_path_buf();
    let report = trainer(run).fit().expect("fit");
    assert_eq!(retained_steps(&report.run), vec![2, 4, 6]);

    let read = |step| {
        Checkpoint::read(storage.as_ref(), &dir.join(Checkpoint::file_name(step)))
            .expect("checkpoint")
    };
    assert_ne!(read(2).model_bytes(), read(6).model_bytes());
}

#[test]
fn non_finite_loss_skips_update_but_keeps_cadence() {
    let storage = Arc::new(MemoryStorage::new());
    let mut config = tiny_config("/runs");
    // One step at this rate overflows the weights; later losses are not finite.
    config.lr = 1e30;
    let run = ExperimentRun::create(storage.clone(), config).expect("create");
    let sink = MemorySink::new();
    let report = trainer(run)
        .with_sink(Box::new(sink.clone()))
        .fit()
        .expect("fit");

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.position.step, 6);
    assert_eq!(retained_steps(&report.run), vec![2, 4, 6]);
    let loss_steps: Vec<u64> = sink
        .events()
        .iter()
        .filter_map(|event| match event {
            TrainingEvent::Scalar { step, name: "loss", .. } => Some(*step),
            _ => None,
        })
        .collect();
    assert_eq!(loss_steps, vec![1], "only the first step had a finite loss");
    assert!(report.last_loss.expect("first step loss").total.is_finite());
}

/// One Adam step on a fixed utterance.
fn fixed_step<O: Optimizer<Model, TrainBackend>>(
    model: Model,
    optim: &mut O,
    arch: &TacotronConfig,
    device: &NdArrayDevice,
) -> Model {
    let frames = 4;
    let ramp = |channels: usize| {
        let values: Vec<f32> = (0..frames * channels).map(|i| (i % 7) as f32 / 7.0).collect();
        Tensor::<TrainBackend, 3>::from_data(TensorData::new(values, [1, frames, channels]), device)
    };
    let text = Tensor::<TrainBackend, 2, Int>::from_data(
        TensorData::new(vec![5i64, 6, 7, 8, 1], [1, 5]),
        device,
    );
    let mel = ramp(arch.num_mels);
    let output = model
        .forward(text, &[5], mel.clone(), &[frames])
        .expect("forward");
    let loss = TacotronLoss::compute(&output, mel, ramp(arch.num_freq), &[frames], arch.r)
        .expect("loss");
    let grads = GradientsParams::from_grads(loss.total.backward(), &model);
    optim.step(1e-3, model, grads)
}

fn weights(model: &Model) -> Vec<u8> {
    encode_record::<TrainBackend, _>(model.clone().into_record()).expect("encode model")
}

#[test]
fn checkpoint_restores_optimizer_moments() {
    let device = NdArrayDevice::default();
    let mut config = tiny_config("/runs");
    config.prenet_dropout = 0.0;
    let encoder = TextEncoder::from_name(&config.text_cleaner).expect("encoder");
    let arch = TacotronConfig::from_config(&config, encoder.vocab_size());

    let mut optim = AdamConfig::new().init::<TrainBackend, Model>();
    let mut model = arch.init::<TrainBackend>(&device);
    for _ in 0..3 {
        model = fixed_step(model, &mut optim, &arch, &device);
    }
    let saved = Checkpoint::new(
        TrainingPosition {
            step: 3,
            epoch: 0,
            epoch_step: 3,
        },
        config.clone(),
        weights(&model),
        encode_record::<TrainBackend, _>(optim.to_record()).expect("encode optimizer"),
    );
    let restored = Checkpoint::from_bytes(Path::new("mem"), &saved.to_bytes().expect("serialize"))
        .expect("parse");
    let continued = weights(&fixed_step(model, &mut optim, &arch, &device));

    let reload = || {
        arch.init::<TrainBackend>(&device)
            .load_record(restored.model_record::<TrainBackend, _>(&device).expect("model record"))
    };
    let mut resumed_optim = AdamConfig::new()
        .init::<TrainBackend, Model>()
        .load_record(
            restored
                .optimizer_record::<TrainBackend, _>(&device)
                .expect("optimizer record"),
        );
    let resumed = weights(&fixed_step(reload(), &mut resumed_optim, &arch, &device));
    assert_eq!(resumed, continued, "restored moments give the same update");

    let mut cold_optim = AdamConfig::new().init::<TrainBackend, Model>();
    let cold = weights(&fixed_step(reload(), &mut cold_optim, &arch, &device));
    assert_ne!(cold, continued, "moments influence the update");
}
