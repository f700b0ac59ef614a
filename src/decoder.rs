use candle_core::{Module, ModuleT, Tensor};
use candle_nn::{linear, Linear, VarBuilder};

use crate::config::DecoderConfig;
use crate::conv_block::{push_conv_block, ConvStage};
use crate::error::{DecoderError, Result};
use crate::residual_block::ResidualBlock;
use crate::stage::{Pipeline, Stage, StageKind};

/// Convolutional decoder with residual stages.
///
/// A dense layer projects each latent vector to an image of `init_shape`,
/// which then runs through a preprocessing conv block, one downsampling
/// stage per entry of `layers` (each followed by `num_res_blocks` residual
/// blocks), and a final convolution collapsing the map to `latent_dim x 1 x 1`.
/// The output is `(batch, latent_dim)`.
///
/// Parameters are looked up under `init_linear.*` and `model.{index}.*`.
#[derive(Debug, Clone)]
pub struct ResidualDecoder {
    init_linear: Linear,
    stages: Vec<Stage>,
    cfg: DecoderConfig,
    final_kernel: (usize, usize),
    span: tracing::Span,
}

impl ResidualDecoder {
    pub fn new(p: VarBuilder, cfg: DecoderConfig) -> Result<Self> {
        cfg.validate()?;
        let final_kernel = cfg.final_kernel()?;
        let batchnorm_eps = cfg.use_batchnorm.then_some(cfg.batchnorm_eps);

        let init_linear = linear(cfg.latent_dim, cfg.init_numel()?, p.pp("init_linear"))?;

        let mut pipeline = Pipeline::new(p.pp("model"));
        let mut input_channels = cfg.stem_channels();
        push_conv_block(
            &mut pipeline,
            cfg.channels(),
            input_channels,
            cfg.activation,
            batchnorm_eps,
        )?;

        for &layer in cfg.layers.iter() {
            let downsample = ConvStage::downsample(pipeline.next_vb(), input_channels, layer)?;
            pipeline.push(Stage::Convolution(downsample));
            for _ in 0..cfg.num_res_blocks {
                let block = ResidualBlock::new(
                    pipeline.next_vb(),
                    layer,
                    cfg.activation,
                    batchnorm_eps,
                    cfg.use_preactivations,
                )?;
                pipeline.push(Stage::Residual(block));
            }
            input_channels = layer;
        }

        let head = ConvStage::collapse(
            pipeline.next_vb(),
            input_channels,
            cfg.latent_dim,
            final_kernel,
        )?;
        pipeline.push(Stage::Convolution(head));

        tracing::debug!(
            latent_dim = cfg.latent_dim,
            init_shape = ?cfg.init_shape,
            stages = pipeline.len(),
            final_kernel = ?final_kernel,
            "built residual decoder"
        );
        let span = tracing::span!(tracing::Level::TRACE, "residual-decoder");
        Ok(Self {
            init_linear,
            stages: pipeline.finish(),
            cfg,
            final_kernel,
            span,
        })
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.cfg
    }

    pub fn latent_dim(&self) -> usize {
        self.cfg.latent_dim
    }

    pub fn init_shape(&self) -> [usize; 3] {
        self.cfg.init_shape
    }

    pub fn final_kernel(&self) -> (usize, usize) {
        self.final_kernel
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(Stage::kind).collect()
    }

    /// Projects latents `(batch, latent_dim)` to images `(batch, C, H, W)`.
    pub fn project(&self, latents: &Tensor) -> Result<Tensor> {
        let batch_size = self.check_latents(latents)?;
        let [channels, height, width] = self.cfg.init_shape;
        let images = self
            .init_linear
            .forward(latents)?
            .reshape((batch_size, channels, height, width))?;
        Ok(images)
    }

    /// Decodes with running batch norm statistics.
    pub fn decode(&self, latents: &Tensor) -> Result<Tensor> {
        self.decode_t(latents, false)
    }

    /// Decodes `(batch, latent_dim)` latents into `(batch, latent_dim)` outputs.
    /// With `train` set, batch norm normalises by batch statistics and updates
    /// its running averages.
    pub fn decode_t(&self, latents: &Tensor, train: bool) -> Result<Tensor> {
        let _enter = self.span.enter();
        let mut hidden_states = self.project(latents)?;
        for stage in self.stages.iter() {
            hidden_states = stage.forward_t(&hidden_states, train)?;
        }
        Ok(hidden_states.flatten_from(1)?)
    }

    fn check_latents(&self, latents: &Tensor) -> Result<usize> {
        match latents.dims() {
            &[batch_size, dim] if dim == self.cfg.latent_dim && batch_size > 0 => Ok(batch_size),
            dims => Err(DecoderError::LatentShape {
                expected: self.cfg.latent_dim,
                got: dims.to_vec(),
            }),
        }
    }
}

impl ModuleT for ResidualDecoder {
    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        self.decode_t(xs, train).map_err(|err| match err {
            DecoderError::Candle(err) => err,
            other => candle_core::Error::wrap(other),
        })
    }
}
