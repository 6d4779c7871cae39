//! Full-sequence and step-by-step decoding must agree.

use crate::common::{assert_close, random_classes, random_mel, tiny_model, TestBackend};
use burn::tensor::Tensor;
use burn_ndarray::NdArrayDevice;
use burn::tensor::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use wavenet::model::vocoder::{one_hot_sequence, Vocoder, VocoderConfig};
use wavenet::modules::residual::dilation_schedule;

#[test]
fn streaming_matches_full_evaluation_for_whole_model() {
    let device = NdArrayDevice::default();
    let model = tiny_model(7);
    let frames = 3;
    let time = frames * model.hop_length();
    let classes = random_classes(2, time, model.num_classes(), 1);
    let input = one_hot_sequence::<TestBackend>(&classes, model.num_classes(), &device)
        .expect("one hot");
    let mel = random_mel(2, 8, frames, &device);

    let full = model.forward(input.clone(), mel.clone()).expect("full");
    let conditions = model.conditions(mel).expect("conditions");

    let mut state = model.decoder.init_streaming(2);
    let mut steps = Vec::with_capacity(time);
    for t in 0..time {
        let logits = model
            .decoder
            .generate_step(
                &mut state,
                input.clone().narrow(2, t, 1),
                conditions.clone().narrow(3, t, 1),
            )
            .expect("step");
        steps.push(logits);
    }
    assert_eq!(state.steps(), time);
    let streamed = Tensor::cat(steps, 2);
    assert_eq!(streamed.dims(), full.dims());
    assert_close(&full.to_data(), &streamed.to_data(), 1e-4);
}

#[test]
fn interleaved_sessions_do_not_interfere() {
    let device = NdArrayDevice::default();
    let model = tiny_model(3);
    let time = model.hop_length();
    let classes = random_classes(1, time, model.num_classes(), 9);
    let input = one_hot_sequence::<TestBackend>(&classes, model.num_classes(), &device)
        .expect("one hot");
    let conditions = model
        .conditions(random_mel(1, 8, 1, &device))
        .expect("conditions");

    let mut a = model.decoder.init_streaming(1);
    let mut b = model.decoder.init_streaming(1);
    let mut from_a = Vec::with_capacity(time);
    for t in 0..time {
        let x = input.clone().narrow(2, t, 1);
        let c = conditions.clone().narrow(3, t, 1);
        from_a.push(
            model
                .decoder
                .generate_step(&mut a, x.clone(), c.clone())
                .expect("a"),
        );
        model
            .decoder
            .generate_step(&mut b, Tensor::zeros(x.dims(), &device), c)
            .expect("b");
    }
    let full = model
        .decoder
        .evaluate_full(input, conditions)
        .expect("full");
    assert_close(&full.to_data(), &Tensor::cat(from_a, 2).to_data(), 1e-4);
    assert_eq!(a.steps(), time);
    assert_eq!(b.steps(), time);
}

#[test]
fn full_evaluation_is_causal() {
    let device = NdArrayDevice::default();
    let model = tiny_model(5);
    let frames = 2;
    let time = frames * model.hop_length();
    let pivot = time / 2;
    let mut classes = random_classes(1, time, model.num_classes(), 4);
    let conditions = model
        .conditions(random_mel(1, 8, frames, &device))
        .expect("conditions");

    let before = model
        .decoder
        .evaluate_full(
            one_hot_sequence::<TestBackend>(&classes, model.num_classes(), &device)
                .expect("one hot"),
            conditions.clone(),
        )
        .expect("before");
    for class in classes[0][pivot..].iter_mut() {
        *class = (*class + 1) % model.num_classes();
    }
    let after = model
        .decoder
        .evaluate_full(
            one_hot_sequence::<TestBackend>(&classes, model.num_classes(), &device)
                .expect("one hot"),
            conditions,
        )
        .expect("after");

    assert_close(
        &before.clone().narrow(2, 0, pivot).to_data(),
        &after.clone().narrow(2, 0, pivot).to_data(),
        1e-6,
    );
    let changed = (before.narrow(2, pivot, 1) - after.narrow(2, pivot, 1))
        .abs()
        .sum()
        .into_scalar();
    assert!(changed > 0.0);
}

#[test]
fn streaming_matches_full_evaluation_across_filter_sizes() {
    let device = NdArrayDevice::default();
    let time = 20;
    for filter_size in [1, 3] {
        let config = VocoderConfig {
            quantize: 8,
            residual_channels: 4,
            skip_channels: 6,
            filter_size,
            dilations: dilation_schedule(2, 3),
            use_embed_tanh: true,
        };
        let vocoder = Vocoder::<TestBackend>::init(
            &config,
            &mut StdRng::seed_from_u64(filter_size as u64),
            &device,
        )
        .expect("init");
        let classes = random_classes(1, time, 8, 11);
        let input = one_hot_sequence::<TestBackend>(&classes, 8, &device).expect("one hot");
        let conditions = Tensor::<TestBackend, 4>::random(
            [6, 1, 8, time],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let full = vocoder
            .evaluate_full(input.clone(), conditions.clone())
            .expect("full");

        let mut state = vocoder.init_streaming(1);
        let steps: Vec<_> = (0..time)
            .map(|t| {
                vocoder
                    .generate_step(
                        &mut state,
                        input.clone().narrow(2, t, 1),
                        conditions.clone().narrow(3, t, 1),
                    )
                    .expect("step")
            })
            .collect();
        assert_close(&full.to_data(), &Tensor::cat(steps, 2).to_data(), 1e-4);
    }
}
