pub mod discriminator;
pub mod generator;
pub mod layers;

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use log::warn;

pub use discriminator::{Discriminator, DiscriminatorConfig};
pub use generator::{Generator, GeneratorConfig};

/// Largest critic depth accepted before falling back to the default.
const MAX_CRITIC_LAYERS: usize = 8;

/// Hyperparameters for the generator and critic.
#[derive(Config, Debug)]
pub struct ModelConfig {
    #[config(default = 32)]
    pub image_size: usize,
    #[config(default = 100)]
    pub latent_size: usize,
    #[config(default = 2)]
    pub generator_layers: usize,
    #[config(default = 3)]
    pub critic_layers: usize,
    #[config(default = 64)]
    pub critic_dim: usize,
    #[config(default = 1)]
    pub critic_stride: usize,
    #[config(default = 0.2)]
    pub leaky_slope: f64,
}

/// Weighting and numerics of the critic objective.
#[derive(Config, Debug)]
pub struct LossConfig {
    #[config(default = 10.0)]
    pub penalty_weight: f64,
    /// Finite-difference step along the input gradient direction.
    #[config(default = 1.0e-2)]
    pub penalty_step: f64,
}

/// Critic objective terms for one batch.
#[derive(Debug)]
pub struct CriticLosses<B: Backend> {
    pub loss: Tensor<B, 1>,
    pub fake_score: Tensor<B, 1>,
    pub real_score: Tensor<B, 1>,
    pub penalty: Tensor<B, 1>,
    pub gradient_norm: Tensor<B, 1>,
}

/// Gradient penalty plus the exact input-gradient norms it was built from.
#[derive(Debug)]
pub struct GradientPenalty<B: Backend> {
    pub penalty: Tensor<B, 1>,
    pub gradient_norm: Tensor<B, 1>,
}

impl ModelConfig {
    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig::new(self.latent_size, self.image_size, self.generator_layers)
    }

    pub fn discriminator_config(&self) -> DiscriminatorConfig {
        DiscriminatorConfig::new(self.image_size, self.critic_layers)
            .with_critic_dim(self.critic_dim)
            .with_stride(self.critic_stride)
            .with_leaky_slope(self.leaky_slope)
    }

    pub fn init_generator<B: Backend>(&self, device: &B::Device) -> Generator<B> {
        self.generator_config().init(device)
    }

    pub fn init_discriminator<B: Backend>(&self, device: &B::Device) -> Discriminator<B> {
        self.discriminator_config().init(device)
    }

    /// Replace out-of-bounds values with their defaults.
    ///
    /// The image size must be a power of two no smaller than 4, and the
    /// generator needs at least one upsampling stage that still leaves a
    /// spatial size of at least 1 to project into.
    pub fn sanitized(mut self) -> Self {
        let defaults = ModelConfig::new();

        if self.image_size < 4 || !self.image_size.is_power_of_two() {
            warn!(
                "image size {} is not a power of two >= 4, using {}",
                self.image_size, defaults.image_size
            );
            self.image_size = defaults.image_size;
        }
        if self.generator_layers == 0 || self.generator_config().base_size() == 0 {
            warn!(
                "{} generator layers do not fit a {}px image, using {}",
                self.generator_layers, self.image_size, defaults.generator_layers
            );
            self.generator_layers = defaults.generator_layers;
        }
        if self.critic_layers == 0 || self.critic_layers > MAX_CRITIC_LAYERS {
            warn!(
                "critic layer count {} out of range, using {}",
                self.critic_layers, defaults.critic_layers
            );
            self.critic_layers = defaults.critic_layers;
        }
        if self.latent_size == 0 {
            self.latent_size = defaults.latent_size;
        }
        if self.critic_dim == 0 {
            self.critic_dim = defaults.critic_dim;
        }
        if self.critic_stride == 0 {
            self.critic_stride = defaults.critic_stride;
        }
        self
    }
}

/// Mix real and generated images: `epsilon * real + (1 - epsilon) * fake`.
pub fn interpolate<B: Backend>(real: Tensor<B, 4>, fake: Tensor<B, 4>, epsilon: f64) -> Tensor<B, 4> {
    real.mul_scalar(epsilon).add(fake.mul_scalar(1.0 - epsilon))
}

/// Per-sample Euclidean norm of a `[batch, ...]` tensor, shaped `[batch, 1]`.
fn per_sample_norm<B: Backend>(tensor: Tensor<B, 4>) -> Tensor<B, 2> {
    let [batch, channels, height, width] = tensor.dims();
    tensor
        .reshape([batch, channels * height * width])
        .square()
        .sum_dim(1)
        .sqrt()
}

/// Gradient of the backward pass with respect to `leaf`.
///
/// A leaf the pass never reached has no gradient; that is reported and
/// treated as zero, which leaves the penalty without a parameter gradient.
fn input_gradient<B: AutodiffBackend>(
    leaf: &Tensor<B, 4>,
    grads: &B::Gradients,
) -> Tensor<B, 4> {
    match leaf.grad(grads) {
        Some(grad) => Tensor::from_inner(grad),
        None => {
            warn!("critic input has no gradient, gradient penalty is inactive for this step");
            leaf.zeros_like()
        }
    }
}

/// Gradient penalty `weight * mean((|grad_x critic(x_hat)| - 1)^2)`.
///
/// The input gradient is taken exactly with a first backward pass on a leaf
/// copy of `x_hat`. Its norm is then rebuilt as a central difference of the
/// critic along the (constant) gradient direction, which carries the same
/// parameter gradient as the norm itself without a double backward.
pub fn gradient_penalty<B: AutodiffBackend>(
    critic: &Discriminator<B>,
    real: Tensor<B, 4>,
    fake: Tensor<B, 4>,
    epsilon: f64,
    config: &LossConfig,
) -> GradientPenalty<B> {
    let x_hat = interpolate(real.detach(), fake.detach(), epsilon);
    let batch = x_hat.dims()[0];

    let leaf = x_hat.clone().require_grad();
    let grads = critic.forward(leaf.clone()).sum().backward();
    let input_grad = input_gradient(&leaf, &grads);

    let norm = per_sample_norm(input_grad.clone());
    let direction = input_grad.div(norm.clone().add_scalar(1.0e-12).reshape([batch, 1, 1, 1]));

    let step = config.penalty_step;
    let ahead = critic.forward(x_hat.clone().add(direction.clone().mul_scalar(step)));
    let behind = critic.forward(x_hat.sub(direction.mul_scalar(step)));
    let directional = ahead.sub(behind).div_scalar(2.0 * step);

    let penalty = directional
        .sub_scalar(1.0)
        .square()
        .mean()
        .mul_scalar(config.penalty_weight);

    GradientPenalty {
        penalty,
        gradient_norm: norm.reshape([batch]),
    }
}

/// Critic objective: `mean D(fake) - mean D(real) + gradient penalty`.
pub fn critic_losses<B: AutodiffBackend>(
    critic: &Discriminator<B>,
    real: Tensor<B, 4>,
    fake: Tensor<B, 4>,
    epsilon: f64,
    config: &LossConfig,
) -> CriticLosses<B> {
    let fake = fake.detach();
    let fake_score = critic.forward(fake.clone()).mean();
    let real_score = critic.forward(real.clone()).mean();
    let GradientPenalty {
        penalty,
        gradient_norm,
    } = gradient_penalty(critic, real, fake, epsilon, config);

    let loss = fake_score.clone().sub(real_score.clone()).add(penalty.clone());

    CriticLosses {
        loss,
        fake_score,
        real_score,
        penalty,
        gradient_norm,
    }
}

/// Generator objective: `-mean D(fake)`.
pub fn generator_loss<B: Backend>(critic: &Discriminator<B>, fake: Tensor<B, 4>) -> Tensor<B, 1> {
    critic.forward(fake).mean().neg()
}
