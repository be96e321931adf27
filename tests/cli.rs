mod common;

use common::{tiny_config, tone, SAMPLE_RATE};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tacotron::audio::WavIo;
use tacotron::config::Config;

fn bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_tacotron"))
}

fn run(cmd: &mut Command) {
    let status = cmd.status().expect("run command");
    assert!(status.success());
}

/// LJSpeech-style dataset with a handful of tones.
fn write_dataset(root: &Path) {
    fs::create_dir_all(root.join("wavs")).expect("wavs dir");
    let rows = [
        ("one", "Hello there.", 220.0),
        ("two", "Good morning, Mr. Brown.", 330.0),
        ("three", "It is 5 past 9.", 440.0),
        ("four", "See you soon", 550.0),
    ];
    let mut metadata = String::new();
    for (id, text, freq) in rows {
        WavIo::write_wav(root.join("wavs").join(format!("{id}.wav")), &tone(freq, 0.05))
            .expect("write wav");
        metadata.push_str(&format!("{id}|{text}|{text}\n"));
    }
    fs::write(root.join("metadata.csv"), metadata).expect("metadata");
}

fn write_config(dir: &Path, config: &Config) -> PathBuf {
    let path = dir.join("config.yaml");
    fs::write(&path, config.to_yaml().expect("yaml")).expect("write config");
    path
}

fn entries(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .map(|it| it.map(|e| e.expect("entry").path()).collect())
        .unwrap_or_default()
}

#[test]
fn griffin_lim_rebuilds_a_wav_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("in.wav");
    let output = dir.path().join("out.wav");
    WavIo::write_wav(&input, &tone(440.0, 0.1)).expect("write input");
    let config = write_config(dir.path(), &tiny_config("runs"));

    run(bin().args([
        "audio",
        "griffin-lim",
        "--input",
        input.to_str().unwrap(),
        "--output",
        output.to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
    ]));

    let (channels, sample_rate) = WavIo::read_wav(&output).expect("read output");
    assert_eq!(sample_rate, SAMPLE_RATE);
    assert_eq!(channels.len(), 1);
    assert!(!channels[0].is_empty());
}

#[test]
fn train_then_say_writes_audio() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_dataset(&dir.path().join("data"));
    let mut config = tiny_config("runs");
    config.data_path = "data".to_string();
    config.epochs = 1;
    let config_path = write_config(dir.path(), &config);

    run(bin().args(["train", "--config", config_path.to_str().unwrap()]));

    let runs = entries(&dir.path().join("runs"));
    assert_eq!(runs.len(), 1, "one run directory");
    let run_dir = &runs[0];
    assert!(run_dir.join("config.yaml").exists());
    assert!(run_dir.join("logs").join("events.jsonl").exists());
    let checkpoint = run_dir.join("checkpoint_00000002.safetensors");
    assert!(checkpoint.exists());

    let output = dir.path().join("say.wav");
    run(bin().args([
        "say",
        "--checkpoint",
        checkpoint.to_str().unwrap(),
        "--text",
        "Hello.",
        "--output",
        output.to_str().unwrap(),
        "--max-decoder-steps",
        "3",
    ]));
    let (channels, sample_rate) = WavIo::read_wav(&output).expect("read say output");
    assert_eq!(sample_rate, SAMPLE_RATE);
    assert!(!channels[0].is_empty());

    run(bin().args([
        "resume",
        "--run-dir",
        run_dir.to_str().unwrap(),
        "--epochs",
        "2",
    ]));
    assert!(run_dir.join("checkpoint_00000004.safetensors").exists());
}

#[test]
fn resume_without_checkpoint_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let run_dir = dir.path().join("run");
    fs::create_dir_all(&run_dir).expect("run dir");
    write_config(&run_dir, &tiny_config("runs"));
    let status = bin()
        .args(["resume", "--run-dir", run_dir.to_str().unwrap()])
        .status()
        .expect("run command");
    assert!(!status.success());
}

#[test]
fn say_rejects_a_zero_step_bound() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = bin()
        .args([
            "say",
            "--checkpoint",
            dir.path().join("missing.safetensors").to_str().unwrap(),
            "--text",
            "Hello.",
            "--output",
            dir.path().join("out.wav").to_str().unwrap(),
            "--max-decoder-steps",
            "0",
        ])
        .output()
        .expect("run command");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("max-decoder-steps"), "{stderr}");
    assert!(!stderr.contains("panicked"), "{stderr}");
}

#[cfg(unix)]
#[test]
fn sigint_before_first_checkpoint_removes_run() {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    use std::time::{Duration, Instant};

    let dir = tempfile::tempdir().expect("tempdir");
    write_dataset(&dir.path().join("data"));
    let mut config = tiny_config("runs");
    config.data_path = "data".to_string();
    config.epochs = 10_000;
    config.save_step = 1_000_000;
    let config_path = write_config(dir.path(), &config);

    let mut child = bin()
        .args(["train", "--config", config_path.to_str().unwrap()])
        .spawn()
        .expect("spawn train");
    let runs = dir.path().join("runs");
    let deadline = Instant::now() + Duration::from_secs(60);
    while entries(&runs).is_empty() {
        assert!(Instant::now() < deadline, "run directory never appeared");
        std::thread::sleep(Duration::from_millis(20));
    }
    kill(Pid::from_raw(child.id() as i32), Signal::SIGINT).expect("send SIGINT");
    let status = child.wait().expect("wait");
    assert!(status.success(), "interrupt exits cleanly");
    assert!(entries(&runs).is_empty(), "left {:?}", entries(&runs));
}
