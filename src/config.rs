use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::activation::Activation;
use crate::error::{DecoderError, Result};

fn default_num_res_blocks() -> usize {
    2
}

fn default_true() -> bool {
    true
}

fn default_batchnorm_eps() -> f64 {
    1e-5
}

/// Shape of a residual decoder.
///
/// `init_shape` is `(channels, height, width)` of the image the latent vector
/// is projected into. Each entry of `layers` adds one downsampling stage, so
/// both spatial extents must be divisible by `2^layers.len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoderConfig {
    pub latent_dim: usize,
    pub init_shape: [usize; 3],
    pub layers: Vec<usize>,
    #[serde(default = "default_num_res_blocks")]
    pub num_res_blocks: usize,
    #[serde(default)]
    pub activation: Activation,
    #[serde(default = "default_true")]
    pub use_batchnorm: bool,
    #[serde(default = "default_true")]
    pub use_preactivations: bool,
    #[serde(default = "default_batchnorm_eps")]
    pub batchnorm_eps: f64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self::new(8, [4, 8, 8], vec![16, 32])
    }
}

impl DecoderConfig {
    pub fn new(latent_dim: usize, init_shape: [usize; 3], layers: Vec<usize>) -> Self {
        Self {
            latent_dim,
            init_shape,
            layers,
            num_res_blocks: default_num_res_blocks(),
            activation: Activation::default(),
            use_batchnorm: true,
            use_preactivations: true,
            batchnorm_eps: default_batchnorm_eps(),
        }
    }

    pub fn with_num_res_blocks(mut self, num_res_blocks: usize) -> Self {
        self.num_res_blocks = num_res_blocks;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_batchnorm(mut self, use_batchnorm: bool) -> Self {
        self.use_batchnorm = use_batchnorm;
        self
    }

    pub fn with_preactivations(mut self, use_preactivations: bool) -> Self {
        self.use_preactivations = use_preactivations;
        self
    }

    pub fn with_batchnorm_eps(mut self, eps: f64) -> Self {
        self.batchnorm_eps = eps;
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn channels(&self) -> usize {
        self.init_shape[0]
    }

    pub fn height(&self) -> usize {
        self.init_shape[1]
    }

    pub fn width(&self) -> usize {
        self.init_shape[2]
    }

    /// Number of elements the latent vector is projected to.
    pub fn init_numel(&self) -> Result<usize> {
        self.init_shape
            .iter()
            .try_fold(1usize, |acc, &extent| acc.checked_mul(extent))
            .ok_or(DecoderError::ShapeOverflow {
                init_shape: self.init_shape,
            })
    }

    /// Channel count leaving the two preprocessing convolutions.
    pub fn stem_channels(&self) -> usize {
        self.layers.first().copied().unwrap_or(self.channels())
    }

    /// Channel count entering the final convolution.
    pub fn head_channels(&self) -> usize {
        self.layers.last().copied().unwrap_or(self.channels())
    }

    /// `2^layers.len()`, the total spatial reduction of the downsampling stages.
    pub fn downsample_factor(&self) -> Result<usize> {
        let stages = self.layers.len();
        u32::try_from(stages)
            .ok()
            .and_then(|exp| 2usize.checked_pow(exp))
            .ok_or(DecoderError::TooManyStages { stages })
    }

    /// Kernel `(height, width)` of the convolution that collapses the last
    /// feature map to 1x1.
    pub fn final_kernel(&self) -> Result<(usize, usize)> {
        let factor = self.downsample_factor()?;
        let mut kernel = [0usize; 2];
        for (slot, (axis, extent)) in [("height", self.height()), ("width", self.width())]
            .into_iter()
            .enumerate()
        {
            if extent == 0 {
                return Err(DecoderError::ZeroDimension {
                    field: format!("init_shape.{axis}"),
                });
            }
            if extent % factor != 0 {
                return Err(DecoderError::IndivisibleExtent {
                    axis,
                    extent,
                    factor,
                });
            }
            kernel[slot] = extent / factor;
        }
        Ok((kernel[0], kernel[1]))
    }

    pub fn validate(&self) -> Result<()> {
        if self.latent_dim == 0 {
            return Err(DecoderError::ZeroDimension {
                field: "latent_dim".to_string(),
            });
        }
        if self.channels() == 0 {
            return Err(DecoderError::ZeroDimension {
                field: "init_shape.channels".to_string(),
            });
        }
        if let Some(i) = self.layers.iter().position(|&width| width == 0) {
            return Err(DecoderError::ZeroDimension {
                field: format!("layers[{i}]"),
            });
        }
        if !(self.batchnorm_eps > 0.) {
            return Err(DecoderError::InvalidEps(self.batchnorm_eps));
        }
        self.final_kernel()?;
        self.init_numel()?;
        Ok(())
    }
}
