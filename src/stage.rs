use std::fmt;

use candle_core::{Module, ModuleT, Result, Tensor};
use candle_nn::{BatchNorm, VarBuilder};

use crate::activation::Activation;
use crate::conv_block::ConvStage;
use crate::residual_block::ResidualBlock;

/// One step of the decoder's sequential pipeline.
#[derive(Debug, Clone)]
pub enum Stage {
    Convolution(ConvStage),
    Normalization { norm: BatchNorm, features: usize },
    Activation(Activation),
    Residual(ResidualBlock),
}

/// Parameter-free description of a [`Stage`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StageKind {
    Convolution {
        in_channels: usize,
        out_channels: usize,
        kernel: (usize, usize),
        stride: usize,
        padding: usize,
    },
    Normalization {
        features: usize,
    },
    Activation(Activation),
    Residual {
        features: usize,
    },
}

impl Stage {
    pub fn kind(&self) -> StageKind {
        match self {
            Self::Convolution(conv) => StageKind::Convolution {
                in_channels: conv.in_channels(),
                out_channels: conv.out_channels(),
                kernel: conv.kernel(),
                stride: conv.stride(),
                padding: conv.padding(),
            },
            Self::Normalization { features, .. } => StageKind::Normalization {
                features: *features,
            },
            Self::Activation(activation) => StageKind::Activation(*activation),
            Self::Residual(block) => StageKind::Residual {
                features: block.features(),
            },
        }
    }
}

impl ModuleT for Stage {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        match self {
            Self::Convolution(conv) => conv.forward(xs),
            Self::Normalization { norm, .. } => norm.forward_t(xs, train),
            Self::Activation(activation) => activation.forward(xs),
            Self::Residual(block) => block.forward_t(xs, train),
        }
    }
}

impl StageKind {
    pub fn is_convolution(&self) -> bool {
        matches!(self, Self::Convolution { .. })
    }

    pub fn is_normalization(&self) -> bool {
        matches!(self, Self::Normalization { .. })
    }

    pub fn is_residual(&self) -> bool {
        matches!(self, Self::Residual { .. })
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Convolution {
                in_channels,
                out_channels,
                kernel: (kh, kw),
                stride,
                padding,
            } => write!(
                f,
                "Conv2d({in_channels}, {out_channels}, kernel=({kh}, {kw}), stride={stride}, padding={padding})"
            ),
            Self::Normalization { features } => write!(f, "BatchNorm2d({features})"),
            Self::Activation(activation) => write!(f, "{activation}"),
            Self::Residual { features } => write!(f, "ResidualBlock({features})"),
        }
    }
}

/// Collects stages in order, handing out a `VarBuilder` scoped to the index
/// the next stage will occupy (`model.0`, `model.1`, ...).
pub struct Pipeline<'a> {
    vb: VarBuilder<'a>,
    stages: Vec<Stage>,
}

impl<'a> Pipeline<'a> {
    pub fn new(vb: VarBuilder<'a>) -> Self {
        Self {
            vb,
            stages: Vec::new(),
        }
    }

    pub fn next_vb(&self) -> VarBuilder<'a> {
        self.vb.pp(self.stages.len().to_string())
    }

    pub fn push(&mut self, stage: Stage) {
        tracing::debug!(index = self.stages.len(), stage = %stage.kind(), "pipeline stage");
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn finish(self) -> Vec<Stage> {
        self.stages
    }
}
