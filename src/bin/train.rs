#![recursion_limit = "256"]
use anyhow::{Context, Result};
use burn::backend::Autodiff;
use burn::config::Config;
use burn::tensor::backend::AutodiffBackend;
use clap::Parser;
use env_logger::Env;
use log::info;
use std::path::{Path, PathBuf};
use wgan_gp_burn::model::{LossConfig, ModelConfig};
use wgan_gp_burn::training::TrainingConfig;

#[derive(Parser, Debug)]
#[command(about = "Train a WGAN-GP on a folder of images with Burn")]
struct Args {
    /// Number of critic convolution layers.
    #[arg(short = 'd', long = "discriminator", default_value_t = 3)]
    discriminator: usize,
    /// Number of generator transposed-convolution layers.
    #[arg(short = 'g', long = "generator", default_value_t = 2)]
    generator: usize,
    /// Square image resolution, a power of two.
    #[arg(short = 's', long = "size", default_value_t = 32)]
    size: usize,
    /// Base directory for the log, model, output and training_data folders.
    #[arg(short = 'p', long = "path", default_value = ".")]
    path: PathBuf,
    #[arg(long, default_value = "img_align_celeba")]
    data_dir: String,
    /// Load the full training configuration from JSON instead of the flags.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value_t = 1000)]
    epochs: usize,
    /// Number of images sampled from the data directory.
    #[arg(long, default_value_t = 20)]
    samples: usize,
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TrainingConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => config_from_args(&args),
    };
    config.model = config.model.clone().sanitized();
    info!(
        "{}px images, {} generator layers, {} critic layers, {} epochs",
        config.model.image_size,
        config.model.generator_layers,
        config.model.critic_layers,
        config.num_epochs
    );

    launch(&args.path, config)
}

fn config_from_args(args: &Args) -> TrainingConfig {
    let model = ModelConfig::new()
        .with_image_size(args.size)
        .with_generator_layers(args.generator)
        .with_critic_layers(args.discriminator);
    TrainingConfig::new(model, LossConfig::new(), args.data_dir.clone())
        .with_num_epochs(args.epochs)
        .with_sample_count(args.samples)
        .with_seed(args.seed)
}

fn run<B: AutodiffBackend>(
    base_dir: &Path,
    config: TrainingConfig,
    device: B::Device,
) -> Result<()> {
    let report = wgan_gp_burn::training::train::<B>(base_dir, config, device)?;
    if let Some(last) = report.epochs.last() {
        info!(
            "finished after {} epochs, final critic loss {:.5}",
            report.epochs.len(),
            last.mean_critic_loss
        );
    }
    Ok(())
}

#[cfg(feature = "wgpu")]
fn launch(base_dir: &Path, config: TrainingConfig) -> Result<()> {
    use burn::backend::{wgpu::WgpuDevice, Wgpu};
    info!("using wgpu backend");
    run::<Autodiff<Wgpu<f32, i32>>>(base_dir, config, WgpuDevice::default())
}

#[cfg(all(feature = "cuda", not(feature = "wgpu")))]
fn launch(base_dir: &Path, config: TrainingConfig) -> Result<()> {
    use burn::backend::{cuda::CudaDevice, Cuda};
    info!("using cuda backend");
    run::<Autodiff<Cuda<f32, i32>>>(base_dir, config, CudaDevice::default())
}

#[cfg(not(any(feature = "wgpu", feature = "cuda")))]
fn launch(base_dir: &Path, config: TrainingConfig) -> Result<()> {
    use burn::backend::{ndarray::NdArrayDevice, NdArray};
    info!("using ndarray backend");
    run::<Autodiff<NdArray<f32>>>(base_dir, config, NdArrayDevice::Cpu)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_flags_map_onto_model_config() {
        let args = Args::parse_from(["train", "-d", "4", "-g", "3", "-s", "64", "-p", "/tmp/run"]);
        let config = config_from_args(&args);
        assert_eq!(config.model.critic_layers, 4);
        assert_eq!(config.model.generator_layers, 3);
        assert_eq!(config.model.image_size, 64);
        assert_eq!(args.path, PathBuf::from("/tmp/run"));
    }

    #[test]
    fn defaults_match_documented_values() {
        let args = Args::parse_from(["train"]);
        let config = config_from_args(&args);
        assert_eq!(config.model.critic_layers, 3);
        assert_eq!(config.model.generator_layers, 2);
        assert_eq!(config.model.image_size, 32);
        assert_eq!(config.num_epochs, 1000);
        assert_eq!(config.n_critic, 5);
        assert_eq!(config.loss.penalty_weight, 10.0);
    }
}
