use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use clap::Parser;
use hf_hub::api::sync::Api;
use tracing_subscriber::EnvFilter;

use residual_decoder::{DecoderConfig, ResidualDecoder};

#[derive(Parser, Debug)]
#[command(version, about = "Decode random latent vectors with a residual decoder")]
struct Args {
    /// JSON decoder config; defaults to latent 8, init shape 4x8x8, layers [16, 32].
    #[arg(long)]
    config: Option<PathBuf>,

    /// Local safetensors checkpoint.
    #[arg(long, conflicts_with = "hub_repo")]
    weights: Option<PathBuf>,

    /// Hugging Face model repo holding the checkpoint.
    #[arg(long)]
    hub_repo: Option<String>,

    #[arg(long, default_value = "model.safetensors")]
    hub_file: String,

    #[arg(long, default_value_t = 1)]
    batch_size: usize,

    /// Run on CPU even when CUDA is available.
    #[arg(long)]
    cpu: bool,

    /// Write freshly initialised weights to this path.
    #[arg(long, conflicts_with_all = ["weights", "hub_repo"])]
    save: Option<PathBuf>,
}

fn checkpoint(args: &Args) -> Result<Option<PathBuf>> {
    if let Some(path) = &args.weights {
        return Ok(Some(path.clone()));
    }
    match &args.hub_repo {
        Some(repo_id) => {
            let api = Api::new()?;
            let repo = api.model(repo_id.clone());
            let path = repo
                .get(&args.hub_file)
                .with_context(|| format!("fetching {} from {repo_id}", args.hub_file))?;
            Ok(Some(path))
        }
        None => Ok(None),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let device = if args.cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available(0)?
    };

    let cfg = match &args.config {
        Some(path) => DecoderConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => DecoderConfig::default(),
    };

    let varmap = VarMap::new();
    let model = match checkpoint(&args)? {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading weights");
            let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, &device)? };
            ResidualDecoder::new(vb, cfg)?
        }
        None => {
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            ResidualDecoder::new(vb, cfg)?
        }
    };

    for (i, kind) in model.kinds().iter().enumerate() {
        println!("model.{i}: {kind}");
    }

    let latents = Tensor::randn(0f32, 1., (args.batch_size, model.latent_dim()), &device)?;
    let now = Instant::now();
    let output = model.decode(&latents)?;
    println!("Time {}", now.elapsed().as_millis());
    println!("output shape: {:?}", output.dims());
    println!("output : {}", output);

    if let Some(path) = &args.save {
        varmap
            .save(path)
            .with_context(|| format!("saving weights to {}", path.display()))?;
        tracing::info!(path = %path.display(), "saved weights");
    }
    Ok(())
}
