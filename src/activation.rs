use candle_core::{Module, Result, Tensor};
use serde::{Deserialize, Serialize};

/// Elementwise non-linearity shared by every stage of the decoder.
///
/// Carries no learnable parameters, so a single value can be copied into
/// as many stages as needed.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Relu,
    Silu,
    Gelu,
    GeluTanh,
    Tanh,
    Sigmoid,
    Elu(f64),
    LeakyRelu(f64),
}

impl Module for Activation {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match *self {
            Self::Relu => xs.relu(),
            Self::Silu => xs.silu(),
            Self::Gelu => xs.gelu_erf(),
            Self::GeluTanh => xs.gelu(),
            Self::Tanh => xs.tanh(),
            Self::Sigmoid => candle_nn::ops::sigmoid(xs),
            Self::Elu(alpha) => xs.elu(alpha),
            Self::LeakyRelu(slope) => candle_nn::ops::leaky_relu(xs, slope),
        }
    }
}

impl std::fmt::Display for Activation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Relu => write!(f, "ReLU"),
            Self::Silu => write!(f, "SiLU"),
            Self::Gelu => write!(f, "GELU"),
            Self::GeluTanh => write!(f, "GELU(tanh)"),
            Self::Tanh => write!(f, "Tanh"),
            Self::Sigmoid => write!(f, "Sigmoid"),
            Self::Elu(alpha) => write!(f, "ELU(alpha={alpha})"),
            Self::LeakyRelu(slope) => write!(f, "LeakyReLU(slope={slope})"),
        }
    }
}
