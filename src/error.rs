use thiserror::Error;

pub type Result<T> = std::result::Result<T, DecoderError>;

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("`{field}` must be positive")]
    ZeroDimension { field: String },

    #[error("{axis} extent {extent} is not divisible by the downsample factor {factor}")]
    IndivisibleExtent {
        axis: &'static str,
        extent: usize,
        factor: usize,
    },

    #[error("{stages} downsampling stages overflow the downsample factor")]
    TooManyStages { stages: usize },

    #[error("init_shape {init_shape:?} has more elements than fit in usize")]
    ShapeOverflow { init_shape: [usize; 3] },

    #[error("batch norm epsilon must be positive, got {0}")]
    InvalidEps(f64),

    #[error("expected latent batch of shape (batch, {expected}), got {got:?}")]
    LatentShape { expected: usize, got: Vec<usize> },

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
