use crate::data::{build_batch, load_image_folder, DataConfig};
use crate::latent::{
    interpolation_coefficients, latents_to_tensor, lerp_latent, LatentDistribution, LatentSampler,
};
use crate::model::{
    critic_losses, generator_loss, CriticLosses, Discriminator, Generator, LossConfig, ModelConfig,
};
use crate::utils::{compile_frames_to_gif, grid_shape, merge_images, save_image, tensor_to_images};
use anyhow::{Context, Result};
use burn::config::Config;
use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use indicatif::ProgressBar;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Training configuration, saved as `model/config.json` for every run.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub model: ModelConfig,
    pub loss: LossConfig,
    pub data_dir: String,
    #[config(default = 1000)]
    pub num_epochs: usize,
    /// Number of images sampled from `data_dir`.
    #[config(default = 20)]
    pub sample_count: usize,
    /// Critic updates per generator update.
    #[config(default = 5)]
    pub n_critic: usize,
    #[config(default = 1.0e-4)]
    pub learning_rate: f64,
    #[config(default = 10)]
    pub interpolation_steps: usize,
    #[config(default = 10)]
    pub final_samples: usize,
    #[config(default = "LatentDistribution::Uniform")]
    pub latent_distribution: LatentDistribution,
    #[config(default = 0)]
    pub seed: u64,
    #[config(default = "AdamConfig::new().with_beta_1(0.0).with_beta_2(0.9)")]
    pub optimizer_gen: AdamConfig,
    #[config(default = "AdamConfig::new().with_beta_1(0.0).with_beta_2(0.9)")]
    pub optimizer_critic: AdamConfig,
}

/// The four directories a run writes into.
#[derive(Clone, Debug)]
pub struct OutputDirs {
    pub log: PathBuf,
    pub model: PathBuf,
    pub output: PathBuf,
    pub training_data: PathBuf,
}

impl OutputDirs {
    pub fn new(base: &Path) -> Self {
        Self {
            log: base.join("log"),
            model: base.join("model"),
            output: base.join("output"),
            training_data: base.join("training_data"),
        }
    }

    /// Create every directory that does not exist yet.
    pub fn create_all(&self) -> Result<()> {
        for dir in [&self.log, &self.model, &self.output, &self.training_data] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Scalar view of one critic update.
#[derive(Clone, Debug, Serialize)]
pub struct CriticMetrics {
    pub loss: f64,
    /// `mean D(real) - mean D(fake)`.
    pub wasserstein: f64,
    pub penalty: f64,
    pub gradient_norm: f64,
    pub epsilon: f64,
}

impl CriticMetrics {
    fn from_losses<B: Backend>(losses: &CriticLosses<B>, epsilon: f64) -> Self {
        let fake = losses.fake_score.clone().into_scalar().elem::<f64>();
        let real = losses.real_score.clone().into_scalar().elem::<f64>();
        Self {
            loss: losses.loss.clone().into_scalar().elem::<f64>(),
            wasserstein: real - fake,
            penalty: losses.penalty.clone().into_scalar().elem::<f64>(),
            gradient_norm: losses.gradient_norm.clone().mean().into_scalar().elem::<f64>(),
            epsilon,
        }
    }
}

/// One line of `log/metrics.jsonl`.
#[derive(Clone, Debug, Serialize)]
pub struct StepMetrics {
    pub epoch: usize,
    pub step: usize,
    pub critic: CriticMetrics,
    pub generator_loss: Option<f64>,
}

/// Mean losses over an epoch.
#[derive(Clone, Debug, Serialize)]
pub struct EpochSummary {
    pub epoch: usize,
    pub mean_critic_loss: f64,
    pub first_critic_loss: f64,
    pub last_critic_loss: f64,
    pub mean_generator_loss: Option<f64>,
    pub generator_steps: usize,
}

impl EpochSummary {
    fn from_steps(epoch: usize, steps: &[StepMetrics]) -> Self {
        let critic_total: f64 = steps.iter().map(|s| s.critic.loss).sum();
        let generator_losses: Vec<f64> = steps.iter().filter_map(|s| s.generator_loss).collect();
        let mean_generator_loss = if generator_losses.is_empty() {
            None
        } else {
            Some(generator_losses.iter().sum::<f64>() / generator_losses.len() as f64)
        };
        Self {
            epoch,
            mean_critic_loss: critic_total / steps.len().max(1) as f64,
            first_critic_loss: steps.first().map_or(0.0, |s| s.critic.loss),
            last_critic_loss: steps.last().map_or(0.0, |s| s.critic.loss),
            mean_generator_loss,
            generator_steps: generator_losses.len(),
        }
    }
}

/// What a finished run produced.
#[derive(Debug)]
pub struct TrainingReport {
    pub epochs: Vec<EpochSummary>,
    pub interpolation_frames: Vec<PathBuf>,
    pub sample_frames: Vec<PathBuf>,
}

/// Whether the in-epoch step `step` also updates the generator.
pub fn trains_generator(step: usize, n_critic: usize) -> bool {
    step % n_critic.max(1) == 0
}

/// Owns both networks, their optimizers and the run's random state.
pub struct WganTrainer<B: AutodiffBackend> {
    config: TrainingConfig,
    generator: Generator<B>,
    critic: Discriminator<B>,
    optim_gen: OptimizerAdaptor<Adam, Generator<B>, B>,
    optim_critic: OptimizerAdaptor<Adam, Discriminator<B>, B>,
    sampler: LatentSampler,
    rng: StdRng,
    device: B::Device,
}

impl<B: AutodiffBackend> WganTrainer<B> {
    pub fn new(config: TrainingConfig, device: B::Device) -> Self {
        B::seed(&device, config.seed);

        let generator = config.model.init_generator::<B>(&device);
        let critic = config.model.init_discriminator::<B>(&device);
        let optim_gen = config.optimizer_gen.init::<B, Generator<B>>();
        let optim_critic = config.optimizer_critic.init::<B, Discriminator<B>>();
        let sampler = LatentSampler::new(config.model.latent_size, config.latent_distribution);
        let rng = StdRng::seed_from_u64(config.seed);

        Self {
            config,
            generator,
            critic,
            optim_gen,
            optim_critic,
            sampler,
            rng,
            device,
        }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn generator(&self) -> &Generator<B> {
        &self.generator
    }

    pub fn critic(&self) -> &Discriminator<B> {
        &self.critic
    }

    /// Draw a latent vector from the run's random stream.
    pub fn sample_latent(&mut self) -> Vec<f32> {
        self.sampler.sample(&mut self.rng)
    }

    fn critic_objective(
        &self,
        real: Tensor<B, 4>,
        latents: &[Vec<f32>],
        epsilon: f64,
    ) -> CriticLosses<B> {
        let fake = self
            .generator
            .forward(latents_to_tensor::<B>(latents, &self.device));
        critic_losses(&self.critic, real, fake, epsilon, &self.config.loss)
    }

    /// Evaluate the critic objective without updating anything.
    pub fn critic_loss(
        &self,
        real: Tensor<B, 4>,
        latents: &[Vec<f32>],
        epsilon: f64,
    ) -> CriticMetrics {
        CriticMetrics::from_losses(&self.critic_objective(real, latents, epsilon), epsilon)
    }

    /// One critic update against fakes rendered from `latents`.
    pub fn critic_step_with(
        &mut self,
        real: Tensor<B, 4>,
        latents: &[Vec<f32>],
        epsilon: f64,
    ) -> CriticMetrics {
        let losses = self.critic_objective(real, latents, epsilon);
        let metrics = CriticMetrics::from_losses(&losses, epsilon);

        let grads = losses.loss.backward();
        let grads = GradientsParams::from_grads(grads, &self.critic);
        self.critic = self
            .optim_critic
            .step(self.config.learning_rate, self.critic.clone(), grads);

        metrics
    }

    /// One critic update with fresh latents and a fresh mixing coefficient.
    pub fn critic_step(&mut self, real: Tensor<B, 4>) -> CriticMetrics {
        let batch = real.dims()[0];
        let latents: Vec<Vec<f32>> = (0..batch).map(|_| self.sample_latent()).collect();
        let epsilon = self.rng.gen_range(0.0..=1.0);
        self.critic_step_with(real, &latents, epsilon)
    }

    /// One generator update against the current critic, returning its loss.
    pub fn generator_step_with(&mut self, latents: &[Vec<f32>]) -> f64 {
        let fake = self
            .generator
            .forward(latents_to_tensor::<B>(latents, &self.device));
        let loss = generator_loss(&self.critic, fake);
        let value = loss.clone().into_scalar().elem::<f64>();

        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &self.generator);
        self.generator = self
            .optim_gen
            .step(self.config.learning_rate, self.generator.clone(), grads);

        value
    }

    /// One generator update with `batch` fresh latents.
    pub fn generator_step(&mut self, batch: usize) -> f64 {
        let latents: Vec<Vec<f32>> = (0..batch).map(|_| self.sample_latent()).collect();
        self.generator_step_with(&latents)
    }

    /// Run one epoch over `batches`: a critic update for each, and a
    /// generator update every `n_critic` steps.
    pub fn train_epoch(&mut self, epoch: usize, batches: &[Tensor<B, 4>]) -> Vec<StepMetrics> {
        let mut steps = Vec::with_capacity(batches.len());
        for (step, real) in batches.iter().enumerate() {
            let batch = real.dims()[0];
            let critic = self.critic_step(real.clone());
            let generator_loss = if trains_generator(step, self.config.n_critic) {
                Some(self.generator_step(batch))
            } else {
                None
            };
            debug!(
                "epoch {epoch} step {step}: critic {:.5} gp {:.5} |grad| {:.4}",
                critic.loss, critic.penalty, critic.gradient_norm
            );
            steps.push(StepMetrics {
                epoch,
                step,
                critic,
                generator_loss,
            });
        }
        steps
    }

    /// Render latent vectors with the current generator, `[count, 3, size, size]`.
    pub fn generate(&self, latents: &[Vec<f32>]) -> Tensor<B::InnerBackend, 4> {
        let generator = self.generator.valid();
        generator.forward(latents_to_tensor::<B::InnerBackend>(latents, &self.device))
    }

    /// Render `z = alpha * z1 + (1 - alpha) * z2` for each coefficient.
    pub fn interpolate(
        &self,
        z1: &[f32],
        z2: &[f32],
        coefficients: &[f32],
    ) -> Tensor<B::InnerBackend, 4> {
        let latents: Vec<Vec<f32>> = coefficients
            .iter()
            .map(|&alpha| lerp_latent(z1, z2, alpha))
            .collect();
        self.generate(&latents)
    }
}

/// Append-only JSON-lines writer for step metrics.
struct MetricsLog {
    writer: BufWriter<File>,
}

impl MetricsLog {
    fn create(path: &Path) -> Result<Self> {
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    fn append(&mut self, steps: &[StepMetrics]) -> Result<()> {
        for step in steps {
            serde_json::to_writer(&mut self.writer, step)?;
            writeln!(self.writer)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// Train a WGAN-GP on an image folder and export samples under `base_dir`.
pub fn train<B: AutodiffBackend>(
    base_dir: &Path,
    config: TrainingConfig,
    device: B::Device,
) -> Result<TrainingReport> {
    let dirs = OutputDirs::new(base_dir);
    dirs.create_all()?;
    config
        .save(dirs.model.join("config.json"))
        .context("failed to save config.json")?;

    let data_config = DataConfig {
        image_dir: PathBuf::from(&config.data_dir),
        image_size: config.model.image_size as u32,
        sample_count: config.sample_count,
    };
    let mut data_rng = StdRng::seed_from_u64(config.seed.wrapping_add(1));
    let images = load_image_folder(&data_config, &mut data_rng)?;
    info!("loaded {} true images", images.len());
    for (idx, img) in images.iter().enumerate() {
        save_image(img, &dirs.training_data.join(format!("real_{idx:03}.png")))?;
    }

    let batches: Vec<Tensor<B, 4>> = images
        .iter()
        .map(|img| build_batch::<B>(&[img], &device))
        .collect();

    let num_epochs = config.num_epochs;
    let mut trainer = WganTrainer::<B>::new(config, device);
    info!(
        "generator params -> {}, critic params -> {}",
        trainer.generator().num_params(),
        trainer.critic().num_params()
    );

    let mut metrics_log = MetricsLog::create(&dirs.log.join("metrics.jsonl"))?;
    let mut epochs = Vec::with_capacity(num_epochs);
    let progress = ProgressBar::new(num_epochs as u64);

    for epoch in 0..num_epochs {
        let steps = trainer.train_epoch(epoch, &batches);
        metrics_log.append(&steps)?;

        let summary = EpochSummary::from_steps(epoch, &steps);
        progress.set_message(format!("critic {:.4}", summary.mean_critic_loss));
        progress.inc(1);
        info!(
            "epoch {}: critic loss {:.5}, generator loss {}",
            epoch,
            summary.mean_critic_loss,
            summary
                .mean_generator_loss
                .map(|loss| format!("{loss:.5}"))
                .unwrap_or_else(|| "-".to_string())
        );
        epochs.push(summary);

        let z = trainer.sample_latent();
        export_images(trainer.generate(&[z]), &dirs.output, |_| format!("epoch_{epoch:04}.png"))?;
    }
    progress.finish_and_clear();

    let interpolation_frames = export_interpolation(&mut trainer, &dirs.output)?;
    let sample_frames = export_samples(&mut trainer, &dirs.output)?;

    Ok(TrainingReport {
        epochs,
        interpolation_frames,
        sample_frames,
    })
}

/// Save each image of a batch under `dir`, naming them by index.
fn export_images<B: Backend>(
    images: Tensor<B, 4>,
    dir: &Path,
    name: impl Fn(usize) -> String,
) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for (idx, img) in tensor_to_images(images)?.iter().enumerate() {
        let path = dir.join(name(idx));
        save_image(img, &path)?;
        paths.push(path);
    }
    Ok(paths)
}

/// Walk the latent line between two random vectors and save every frame,
/// plus an animated `interp.gif`.
pub fn export_interpolation<B: AutodiffBackend>(
    trainer: &mut WganTrainer<B>,
    dir: &Path,
) -> Result<Vec<PathBuf>> {
    let z1 = trainer.sample_latent();
    let z2 = trainer.sample_latent();
    let coefficients = interpolation_coefficients(trainer.config().interpolation_steps);
    debug!("interpolation coefficients {coefficients:?}");

    let frames = trainer.interpolate(&z1, &z2, &coefficients);
    let paths = export_images(frames, dir, |idx| format!("interp_{idx:02}.png"))?;
    compile_frames_to_gif(&paths, &dir.join("interp.gif"))?;
    info!("saved {} interpolation frames to {}", paths.len(), dir.display());
    Ok(paths)
}

/// Save independent random samples and a grid of all of them.
pub fn export_samples<B: AutodiffBackend>(
    trainer: &mut WganTrainer<B>,
    dir: &Path,
) -> Result<Vec<PathBuf>> {
    let count = trainer.config().final_samples;
    if count == 0 {
        return Ok(Vec::new());
    }
    let latents: Vec<Vec<f32>> = (0..count).map(|_| trainer.sample_latent()).collect();
    let images = trainer.generate(&latents);

    let rendered = tensor_to_images(images.clone())?;
    let (rows, cols) = grid_shape(rendered.len());
    save_image(&merge_images(&rendered, rows, cols)?, &dir.join("samples.png"))?;

    let paths = export_images(images, dir, |idx| format!("sample_{idx:02}.png"))?;
    info!("saved {} samples to {}", paths.len(), dir.display());
    Ok(paths)
}
