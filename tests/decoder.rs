use candle_core::{DType, Device, ModuleT, Tensor};
use candle_nn::{VarBuilder, VarMap};
use residual_decoder::{Activation, DecoderConfig, DecoderError, ResidualDecoder, StageKind};

fn build(cfg: DecoderConfig) -> (VarMap, ResidualDecoder) {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let decoder = ResidualDecoder::new(vb, cfg).unwrap();
    (varmap, decoder)
}

fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
    (a - b)
        .unwrap()
        .abs()
        .unwrap()
        .flatten_all()
        .unwrap()
        .max(0)
        .unwrap()
        .to_scalar::<f32>()
        .unwrap()
}

#[test]
fn divisible_heights_give_integer_kernels() {
    for (height, layers, kernel) in [
        (8, vec![16, 32], 2),
        (16, vec![4], 8),
        (32, vec![4, 4, 4, 4, 4], 1),
        (12, vec![3, 3], 3),
    ] {
        let (_, decoder) = build(DecoderConfig::new(4, [2, height, height], layers));
        assert_eq!(decoder.final_kernel(), (kernel, kernel));
        match decoder.kinds().last() {
            Some(StageKind::Convolution {
                kernel: k,
                out_channels,
                ..
            }) => {
                assert_eq!(*k, (kernel, kernel));
                assert_eq!(*out_channels, 4);
            }
            other => panic!("unexpected final stage {other:?}"),
        }
    }
}

#[test]
fn empty_layers_skip_downsampling() {
    let (_, decoder) = build(DecoderConfig::new(6, [3, 4, 4], vec![]));
    let kinds = decoder.kinds();
    assert_eq!(kinds.len(), 7);
    assert!(!kinds.iter().any(StageKind::is_residual));
    assert_eq!(
        kinds[6],
        StageKind::Convolution {
            in_channels: 3,
            out_channels: 6,
            kernel: (4, 4),
            stride: 1,
            padding: 0,
        }
    );

    let latents = Tensor::randn(0f32, 1., (1, 6), &Device::Cpu).unwrap();
    assert_eq!(decoder.decode(&latents).unwrap().dims(), [1, 6]);
}

#[test]
fn indivisible_height_fails_construction() {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let res = ResidualDecoder::new(vb, DecoderConfig::new(8, [4, 7, 7], vec![16]));
    assert!(matches!(
        res,
        Err(DecoderError::IndivisibleExtent {
            axis: "height",
            extent: 7,
            factor: 2,
        })
    ));
    // nothing allocated for a rejected config
    assert!(varmap.all_vars().is_empty());
}

#[test]
fn reference_configuration_layout() {
    let cfg = DecoderConfig::new(8, [4, 8, 8], vec![16, 32]).with_num_res_blocks(2);
    let (_, decoder) = build(cfg);
    let kinds = decoder.kinds();
    let skeleton: Vec<&str> = kinds
        .iter()
        .filter(|k| k.is_convolution() || k.is_residual())
        .map(|k| match k {
            StageKind::Convolution { stride: 2, .. } => "down",
            StageKind::Convolution { padding: 1, .. } => "pre",
            StageKind::Convolution { .. } => "final",
            _ => "res",
        })
        .collect();
    assert_eq!(
        skeleton,
        ["pre", "pre", "down", "res", "res", "down", "res", "res", "final"]
    );
    assert_eq!(decoder.final_kernel(), (2, 2));
}

#[test]
fn single_latent_returns_latent_width() {
    let (_, decoder) = build(DecoderConfig::new(8, [4, 8, 8], vec![16, 32]));
    let latents = Tensor::randn(0f32, 1., (1, 8), &Device::Cpu).unwrap();
    let ys = decoder.decode(&latents).unwrap();
    assert_eq!(ys.dims(), [1, 8]);
}

#[test]
fn disabling_batchnorm_only_removes_norm_stages() {
    let base = DecoderConfig::new(8, [4, 8, 8], vec![16, 32]);
    let (_, with_bn) = build(base.clone());
    let (_, without_bn) = build(base.with_batchnorm(false));

    let with_kinds = with_bn.kinds();
    let without_kinds = without_bn.kinds();
    assert_eq!(with_kinds.len() - without_kinds.len(), 2);
    assert_eq!(
        with_kinds.iter().filter(|k| k.is_normalization()).count(),
        2
    );
    assert!(!without_kinds.iter().any(StageKind::is_normalization));
    let stripped: Vec<_> = with_kinds
        .into_iter()
        .filter(|k| !k.is_normalization())
        .collect();
    assert_eq!(stripped, without_kinds);

    let latents = Tensor::randn(0f32, 1., (1, 8), &Device::Cpu).unwrap();
    let shapes = |decoder: &ResidualDecoder| {
        let mut xs = decoder.project(&latents).unwrap();
        let mut shapes = vec![xs.dims().to_vec()];
        for stage in decoder.stages() {
            xs = stage.forward_t(&xs, false).unwrap();
            if !stage.kind().is_normalization() {
                shapes.push(xs.dims().to_vec());
            }
        }
        shapes
    };
    assert_eq!(shapes(&with_bn), shapes(&without_bn));
}

#[test]
fn batch_rows_decode_independently() {
    let cfg = DecoderConfig::new(6, [2, 8, 8], vec![4, 8]).with_activation(Activation::Silu);
    let (_, decoder) = build(cfg);
    let latents = Tensor::randn(0f32, 1., (3, 6), &Device::Cpu).unwrap();
    let batched = decoder.decode(&latents).unwrap();
    assert_eq!(batched.dims(), [3, 6]);
    for row in 0..3 {
        let single = decoder.decode(&latents.narrow(0, row, 1).unwrap()).unwrap();
        let from_batch = batched.narrow(0, row, 1).unwrap();
        assert!(max_abs_diff(&single, &from_batch) < 1e-4);
    }
}

#[test]
fn decoding_is_deterministic_in_eval_mode() {
    let (_, decoder) = build(DecoderConfig::new(8, [4, 8, 8], vec![16]));
    let latents = Tensor::randn(0f32, 1., (2, 8), &Device::Cpu).unwrap();
    let a = decoder.decode(&latents).unwrap();
    let b = decoder.decode(&latents).unwrap();
    assert_eq!(max_abs_diff(&a, &b), 0.);
}

#[test]
fn training_updates_running_statistics() {
    let (varmap, decoder) = build(DecoderConfig::new(4, [2, 4, 4], vec![4]));
    let before = varmap.data().lock().unwrap()["model.1.running_mean"]
        .as_tensor()
        .copy()
        .unwrap();
    let latents = Tensor::randn(0f32, 1., (4, 4), &Device::Cpu).unwrap();
    let ys = decoder.forward_t(&latents, true).unwrap();
    assert_eq!(ys.dims(), [4, 4]);
    let after = varmap.data().lock().unwrap()["model.1.running_mean"]
        .as_tensor()
        .copy()
        .unwrap();
    assert!(max_abs_diff(&before, &after) > 0.);
}

#[test]
fn weights_round_trip_through_safetensors() {
    let cfg = DecoderConfig::new(8, [4, 8, 8], vec![16, 32]).with_preactivations(false);
    let (varmap, decoder) = build(cfg.clone());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("decoder.safetensors");
    varmap.save(&path).unwrap();

    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(&[&path], DType::F32, &Device::Cpu).unwrap()
    };
    let reloaded = ResidualDecoder::new(vb, cfg).unwrap();

    let latents = Tensor::randn(0f32, 1., (2, 8), &Device::Cpu).unwrap();
    let original = decoder.decode(&latents).unwrap();
    let restored = reloaded.decode(&latents).unwrap();
    assert!(max_abs_diff(&original, &restored) < 1e-6);
}

#[test]
fn checkpoint_for_other_shape_is_rejected() {
    let (varmap, _) = build(DecoderConfig::new(8, [4, 8, 8], vec![16]));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("decoder.safetensors");
    varmap.save(&path).unwrap();

    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(&[&path], DType::F32, &Device::Cpu).unwrap()
    };
    let res = ResidualDecoder::new(vb, DecoderConfig::new(8, [4, 8, 8], vec![32]));
    assert!(matches!(res, Err(DecoderError::Candle(_))));
}
