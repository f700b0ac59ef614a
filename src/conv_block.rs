use candle_core::{Module, Result, Tensor};
use candle_nn::{batch_norm, conv2d, BatchNormConfig, Conv2d, Conv2dConfig, Init, VarBuilder};

use crate::activation::Activation;
use crate::stage::{Pipeline, Stage};

/// Convolution plus the geometry it was built with, kept for introspection.
#[derive(Debug, Clone)]
pub struct ConvStage {
    conv: Conv2d,
    in_channels: usize,
    out_channels: usize,
    kernel: (usize, usize),
    stride: usize,
    padding: usize,
}

impl ConvStage {
    /// 3x3, stride 1, padding 1: keeps the spatial extent.
    pub fn same(p: VarBuilder, in_channels: usize, out_channels: usize) -> Result<Self> {
        Self::square(p, in_channels, out_channels, 3, 1, 1)
    }

    /// 2x2, stride 2, no padding: halves height and width.
    pub fn downsample(p: VarBuilder, in_channels: usize, out_channels: usize) -> Result<Self> {
        Self::square(p, in_channels, out_channels, 2, 2, 0)
    }

    /// Covers the whole remaining feature map, leaving a 1x1 output.
    ///
    /// `candle_nn::conv2d` only builds square kernels, so the weight is
    /// allocated here with the same initialisation it uses.
    pub fn collapse(
        p: VarBuilder,
        in_channels: usize,
        out_channels: usize,
        kernel: (usize, usize),
    ) -> Result<Self> {
        let (kh, kw) = kernel;
        let weight = p.get_with_hints(
            (out_channels, in_channels, kh, kw),
            "weight",
            candle_nn::init::DEFAULT_KAIMING_NORMAL,
        )?;
        // candle's conv2d bound; torch uses 1/sqrt(in_channels * kh * kw).
        let bound = 1. / (in_channels as f64).sqrt();
        let bias = p.get_with_hints(
            out_channels,
            "bias",
            Init::Uniform {
                lo: -bound,
                up: bound,
            },
        )?;
        Ok(Self {
            conv: Conv2d::new(weight, Some(bias), conv_config(1, 0)),
            in_channels,
            out_channels,
            kernel,
            stride: 1,
            padding: 0,
        })
    }

    fn square(
        p: VarBuilder,
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
    ) -> Result<Self> {
        let conv = conv2d(
            in_channels,
            out_channels,
            kernel_size,
            conv_config(stride, padding),
            p,
        )?;
        Ok(Self {
            conv,
            in_channels,
            out_channels,
            kernel: (kernel_size, kernel_size),
            stride,
            padding,
        })
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn kernel(&self) -> (usize, usize) {
        self.kernel
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn padding(&self) -> usize {
        self.padding
    }
}

impl Module for ConvStage {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.conv.forward(xs)
    }
}

pub(crate) fn conv_config(stride: usize, padding: usize) -> Conv2dConfig {
    Conv2dConfig {
        padding,
        stride,
        ..Default::default()
    }
}

pub(crate) fn bn_config(eps: f64) -> BatchNormConfig {
    BatchNormConfig {
        eps,
        ..Default::default()
    }
}

/// Appends the preprocessing block: two same-size convolutions, each
/// followed by an optional batch norm and the activation.
pub fn push_conv_block(
    pipeline: &mut Pipeline,
    in_channels: usize,
    out_channels: usize,
    activation: Activation,
    batchnorm_eps: Option<f64>,
) -> Result<()> {
    for conv_in in [in_channels, out_channels] {
        let conv = ConvStage::same(pipeline.next_vb(), conv_in, out_channels)?;
        pipeline.push(Stage::Convolution(conv));
        if let Some(eps) = batchnorm_eps {
            let norm = batch_norm(out_channels, bn_config(eps), pipeline.next_vb())?;
            pipeline.push(Stage::Normalization {
                norm,
                features: out_channels,
            });
        }
        pipeline.push(Stage::Activation(activation));
    }
    Ok(())
}
