use crate::common::{write_test_wav, FIXTURE_DIR};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use wavenet::audio::io::WavIo;
use wavenet::audio::MelSpectrogram;

fn fixture_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join(FIXTURE_DIR)
        .join("tiny_config.yaml")
}

fn run(args: &[&str]) -> Output {
    let output = Command::new(env!("CARGO_BIN_EXE_wavenet"))
        .args(args)
        .output()
        .expect("run wavenet");
    assert!(
        output.status.success(),
        "wavenet {args:?} failed:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

fn path_str(path: &Path) -> &str {
    path.to_str().expect("utf-8 path")
}

/// Write weights plus a config pointing at them; returns the config path.
fn init_model(dir: &Path) -> PathBuf {
    let weights = dir.join("tiny.safetensors");
    let config = dir.join("tiny.yaml");
    run(&[
        "init",
        "--config",
        path_str(&fixture_config()),
        "--output",
        path_str(&weights),
        "--save-config",
        path_str(&config),
        "--seed",
        "3",
    ]);
    assert!(weights.exists());
    config
}

#[test]
fn cli_init_then_info() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = init_model(dir.path());
    let output = run(&["info", "--config", path_str(&config)]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("classes: 16"));
    assert!(stdout.contains("layers: 3"));
    assert!(stdout.contains("receptive_field: 9 samples"));
}

#[test]
fn cli_mel_writes_features() {
    let dir = tempfile::tempdir().expect("tempdir");
    let wav = dir.path().join("input.wav");
    write_test_wav(&wav, 8000, 800);
    let mel_path = dir.path().join("input.mel.safetensors");
    run(&[
        "mel",
        path_str(&wav),
        "--output",
        path_str(&mel_path),
        "--config",
        path_str(&fixture_config()),
    ]);
    let mel = MelSpectrogram::load(&mel_path).expect("load mel");
    assert_eq!(mel.n_mels, 8);
    assert!(mel.frames > 1);
    assert!(mel.data.iter().all(|v| v.is_finite()));
}

#[test]
fn cli_vocode_from_wav_and_from_mel() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = init_model(dir.path());
    let wav = dir.path().join("input.wav");
    write_test_wav(&wav, 8000, 800);

    let out = dir.path().join("out.wav");
    run(&[
        "vocode",
        path_str(&wav),
        "--output",
        path_str(&out),
        "--config",
        path_str(&config),
        "--seed",
        "1",
        "--max-samples",
        "40",
    ]);
    let (decoded, sample_rate) = WavIo::read_wav(&out).expect("read wav");
    assert_eq!(sample_rate, 8000);
    assert_eq!(decoded[0].len(), 40);

    let mel_path = dir.path().join("input.mel.safetensors");
    MelSpectrogram {
        n_mels: 8,
        frames: 2,
        data: vec![0.5; 16],
    }
    .save(&mel_path)
    .expect("save mel");
    let out = dir.path().join("from_mel.wav");
    run(&[
        "vocode",
        path_str(&mel_path),
        "--output",
        path_str(&out),
        "--config",
        path_str(&config),
    ]);
    let (decoded, _) = WavIo::read_wav(&out).expect("read wav");
    assert_eq!(decoded[0].len(), 32);
}

#[test]
fn cli_vocode_streaming_matches_batch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = init_model(dir.path());
    let wav = dir.path().join("input.wav");
    write_test_wav(&wav, 8000, 400);

    let batch = dir.path().join("batch.wav");
    let stream = dir.path().join("stream.wav");
    for (out, extra) in [(&batch, None), (&stream, Some("--stream"))] {
        let mut args = vec![
            "vocode",
            path_str(&wav),
            "--output",
            path_str(out),
            "--config",
            path_str(&config),
            "--seed",
            "9",
            "--chunk-size",
            "7",
            "--progress",
        ];
        args.extend(extra);
        run(&args);
    }
    let (a, _) = WavIo::read_wav(&batch).expect("batch");
    let (b, _) = WavIo::read_wav(&stream).expect("stream");
    assert_eq!(a, b);
    assert!(!a[0].is_empty());
}

#[test]
fn cli_evaluate_reports_loss() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = init_model(dir.path());
    let wav = dir.path().join("input.wav");
    write_test_wav(&wav, 8000, 800);

    let output = run(&["evaluate", path_str(&wav), "--config", path_str(&config)]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let loss: f32 = stdout
        .lines()
        .find_map(|line| line.strip_prefix("loss: "))
        .expect("loss line")
        .trim()
        .parse()
        .expect("loss value");
    assert!(loss.is_finite() && loss > 0.0);
    assert!(stdout.contains("accuracy: "));
}

#[test]
fn cli_vocode_without_weights_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let wav = dir.path().join("input.wav");
    write_test_wav(&wav, 8000, 400);
    let status = Command::new(env!("CARGO_BIN_EXE_wavenet"))
        .args([
            "vocode",
            path_str(&wav),
            "--output",
            path_str(&dir.path().join("out.wav")),
            "--config",
            path_str(&fixture_config()),
        ])
        .status()
        .expect("run wavenet");
    assert!(!status.success());
}
