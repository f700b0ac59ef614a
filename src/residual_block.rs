use candle_core::{Module, ModuleT, Result, Tensor};
use candle_nn::{batch_norm, BatchNorm, VarBuilder};

use crate::activation::Activation;
use crate::conv_block::{bn_config, ConvStage};

/// Two 3x3 convolutions wrapped by an identity skip connection.
///
/// With pre-activations the block computes
/// `x + conv_b(act(norm_b(conv_a(act(norm_a(x))))))`, otherwise
/// `act(x + norm_b(conv_b(act(norm_a(conv_a(x))))))`. Norms are absent when
/// batch norm is disabled. Channel count and spatial extent are preserved.
#[derive(Debug, Clone)]
pub struct ResidualBlock {
    conv_a: ConvStage,
    conv_b: ConvStage,
    norm_a: Option<BatchNorm>,
    norm_b: Option<BatchNorm>,
    activation: Activation,
    preactivation: bool,
    features: usize,
    span: tracing::Span,
}

impl ResidualBlock {
    pub fn new(
        p: VarBuilder,
        features: usize,
        activation: Activation,
        batchnorm_eps: Option<f64>,
        preactivation: bool,
    ) -> Result<Self> {
        let conv_a = ConvStage::same(p.pp("conv_a"), features, features)?;
        let conv_b = ConvStage::same(p.pp("conv_b"), features, features)?;
        let (norm_a, norm_b) = match batchnorm_eps {
            Some(eps) => (
                Some(batch_norm(features, bn_config(eps), p.pp("norm_a"))?),
                Some(batch_norm(features, bn_config(eps), p.pp("norm_b"))?),
            ),
            None => (None, None),
        };
        let span = tracing::span!(tracing::Level::TRACE, "residual-block", features);
        Ok(Self {
            conv_a,
            conv_b,
            norm_a,
            norm_b,
            activation,
            preactivation,
            features,
            span,
        })
    }

    pub fn features(&self) -> usize {
        self.features
    }

    pub fn is_preactivation(&self) -> bool {
        self.preactivation
    }

    fn norm(norm: &Option<BatchNorm>, xs: Tensor, train: bool) -> Result<Tensor> {
        match norm {
            Some(norm) => norm.forward_t(&xs, train),
            None => Ok(xs),
        }
    }
}

impl ModuleT for ResidualBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let _enter = self.span.enter();
        if self.preactivation {
            let mut hidden_states = Self::norm(&self.norm_a, xs.clone(), train)?;
            hidden_states = self.activation.forward(&hidden_states)?;
            hidden_states = self.conv_a.forward(&hidden_states)?;
            hidden_states = Self::norm(&self.norm_b, hidden_states, train)?;
            hidden_states = self.activation.forward(&hidden_states)?;
            hidden_states = self.conv_b.forward(&hidden_states)?;
            xs + hidden_states
        } else {
            let mut hidden_states = self.conv_a.forward(xs)?;
            hidden_states = Self::norm(&self.norm_a, hidden_states, train)?;
            hidden_states = self.activation.forward(&hidden_states)?;
            hidden_states = self.conv_b.forward(&hidden_states)?;
            hidden_states = Self::norm(&self.norm_b, hidden_states, train)?;
            self.activation.forward(&(xs + hidden_states)?)
        }
    }
}
