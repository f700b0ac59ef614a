//! Convolutional decoder with residual stages, built on candle.
//!
//! A [`ResidualDecoder`] projects a batch of latent vectors into an initial
//! image, runs it through strided convolutions and residual blocks, and
//! collapses the last feature map back to a `latent_dim`-wide vector.

pub mod activation;
pub mod config;
pub mod conv_block;
pub mod decoder;
pub mod error;
pub mod residual_block;
pub mod stage;

pub use activation::Activation;
pub use config::DecoderConfig;
pub use decoder::ResidualDecoder;
pub use error::{DecoderError, Result};
pub use residual_block::ResidualBlock;
pub use stage::{Stage, StageKind};
