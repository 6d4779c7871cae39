mod common;

use burn::tensor::Tensor;
use burn_ndarray::NdArrayDevice;
use common::{random_mel, tiny_config, tiny_model, TestBackend, FIXTURE_DIR};
use std::ops::ControlFlow;
use wavenet::config::load_config;
use wavenet::model::generator::{Generator, SamplerConfig};
use wavenet::model::vocoder::VocoderState;
use wavenet::runtime::{init_checkpoint, VocodeParams, VocoderRuntime};
use wavenet::{SessionPhase, VocoderError};

#[test]
fn missing_weights_path_errors() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = tiny_config();
    config.weights_path = Some("missing_weights.safetensors".to_string());
    let config_path = dir.path().join("config.yaml");
    wavenet::config::save_config(&config, &config_path).expect("save config");

    let device = NdArrayDevice::default();
    let err = VocoderRuntime::<TestBackend>::from_config_path(&config_path, None, &device)
        .unwrap_err();
    assert!(err.to_string().contains("weights file not found"));

    let err = VocoderRuntime::<TestBackend>::from_config_path(
        format!("{FIXTURE_DIR}/tiny_config.yaml"),
        None,
        &device,
    )
    .unwrap_err();
    assert!(err.to_string().contains("no weights"));
}

#[test]
fn misaligned_upsampling_is_rejected_at_load() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bad.yaml");
    let yaml = std::fs::read_to_string(format!("{FIXTURE_DIR}/tiny_config.yaml"))
        .expect("read fixture")
        .replace("factors: [4, 4]", "factors: [4, 2]");
    std::fs::write(&path, yaml).expect("write config");

    let err = load_config(&path).unwrap_err();
    match err.downcast_ref::<VocoderError>() {
        Some(VocoderError::Alignment {
            product,
            hop_length,
            ..
        }) => {
            assert_eq!(*product, 8);
            assert_eq!(*hop_length, 16);
        }
        other => panic!("expected alignment error, got {other:?}"),
    }
}

#[test]
fn generating_past_the_conditioning_is_out_of_range() {
    let device = NdArrayDevice::default();
    let model = tiny_model(0);
    let conditions = model
        .conditions(random_mel(1, 8, 1, &device))
        .expect("conditions");
    let mut generator =
        Generator::new(&model.decoder, &SamplerConfig::default()).expect("generator");
    let err = generator.run(conditions.clone(), 17).unwrap_err();
    assert!(matches!(
        err,
        VocoderError::IndexOutOfRange {
            requested: 17,
            available: 16
        }
    ));
    assert!(generator.run(conditions, 0).expect("empty").is_empty());
}

#[test]
fn default_session_cannot_step() {
    let device = NdArrayDevice::default();
    let model = tiny_model(0);
    let mut state = VocoderState::<TestBackend>::default();
    assert_eq!(state.phase(), SessionPhase::Uninitialized);
    let conditions = model
        .conditions(random_mel(1, 8, 1, &device))
        .expect("conditions");
    let err = model
        .decoder
        .generate_step(
            &mut state,
            Tensor::zeros([1, model.num_classes(), 1], &device),
            conditions.narrow(3, 0, 1),
        )
        .unwrap_err();
    assert!(matches!(err, VocoderError::InvalidState(_)));
}

#[test]
fn wrong_mel_width_is_an_invalid_shape() {
    let device = NdArrayDevice::default();
    let model = tiny_model(0);
    let err = model.conditions(random_mel(1, 7, 2, &device)).unwrap_err();
    assert!(matches!(err, VocoderError::InvalidShape { .. }));
}

#[test]
fn runtime_stops_when_sink_breaks() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = tiny_config();
    let weights = dir.path().join("tiny.safetensors");
    let device = NdArrayDevice::default();
    init_checkpoint::<TestBackend>(&config, 1, &weights, None, &device).expect("init");

    let runtime =
        VocoderRuntime::<TestBackend>::from_config(&config, &weights, &device).expect("runtime");
    let mel = wavenet::audio::MelSpectrogram {
        n_mels: 8,
        frames: 4,
        data: vec![0.0; 32],
    };
    let params = VocodeParams {
        seed: Some(5),
        chunk_size: 10,
        ..VocodeParams::default()
    };
    let mut chunks = Vec::new();
    let produced = runtime
        .vocode(&mel, &params, |chunk| {
            chunks.push(chunk.len());
            Ok(if chunks.len() == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            })
        })
        .expect("vocode");
    assert_eq!(chunks, vec![10, 10]);
    assert_eq!(produced, 20);

    let err = runtime
        .vocode(&mel, &params, |_| anyhow::bail!("disk full"))
        .unwrap_err();
    assert!(err.to_string().contains("disk full"));

    let whole = runtime.vocode_to_vec(&mel, &params).expect("whole");
    assert_eq!(whole.len(), 64);
    assert!(whole.iter().all(|s| (-1.0..=1.0).contains(s)));
}

#[test]
fn zero_frame_mel_is_an_error_not_a_panic() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = tiny_config();
    let weights = dir.path().join("tiny.safetensors");
    let device = NdArrayDevice::default();
    init_checkpoint::<TestBackend>(&config, 1, &weights, None, &device).expect("init");
    let runtime =
        VocoderRuntime::<TestBackend>::from_config(&config, &weights, &device).expect("runtime");

    let empty = wavenet::audio::MelSpectrogram {
        n_mels: 8,
        frames: 0,
        data: Vec::new(),
    };
    let err = runtime
        .vocode_to_vec(&empty, &VocodeParams::default())
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<VocoderError>(),
        Some(VocoderError::InvalidShape { .. })
    ));

    let path = dir.path().join("empty.mel.safetensors");
    empty.save(&path).expect("save");
    assert!(wavenet::audio::MelSpectrogram::load(&path).is_err());
}
