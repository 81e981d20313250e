use burn::prelude::*;
use burn::tensor::TensorData;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Standard deviation of the truncated normal; [-1, 1] is then +/- 2 sigma.
const TRUNCATED_STD: f32 = 0.5;

/// Distribution latent coordinates are drawn from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LatentDistribution {
    /// Uniform over [-1, 1].
    #[default]
    Uniform,
    /// Normal with sigma 0.5, resampled until it lands in [-1, 1].
    TruncatedNormal,
}

/// Draws bounded latent vectors of a fixed length.
#[derive(Clone, Debug)]
pub struct LatentSampler {
    size: usize,
    distribution: LatentDistribution,
}

impl LatentSampler {
    pub fn new(size: usize, distribution: LatentDistribution) -> Self {
        Self { size, distribution }
    }

    /// Draw one latent vector.
    pub fn sample(&self, rng: &mut impl Rng) -> Vec<f32> {
        match self.distribution {
            LatentDistribution::Uniform => (0..self.size)
                .map(|_| rng.gen_range(-1.0..=1.0))
                .collect(),
            LatentDistribution::TruncatedNormal => (0..self.size)
                .map(|_| loop {
                    let value: f32 = rng.sample::<f32, _>(StandardNormal) * TRUNCATED_STD;
                    if (-1.0..=1.0).contains(&value) {
                        break value;
                    }
                })
                .collect(),
        }
    }

}

/// Linear blend `alpha * start + (1 - alpha) * end` of two latent vectors.
pub fn lerp_latent(start: &[f32], end: &[f32], alpha: f32) -> Vec<f32> {
    start
        .iter()
        .zip(end)
        .map(|(a, b)| alpha * a + (1.0 - alpha) * b)
        .collect()
}

/// Evenly spaced coefficients `0, 1/steps, ..., 1`.
pub fn interpolation_coefficients(steps: usize) -> Vec<f32> {
    if steps == 0 {
        return vec![0.0];
    }
    (0..=steps).map(|idx| idx as f32 / steps as f32).collect()
}

/// Stack equally sized latent vectors into a `[count, size]` tensor.
pub fn latents_to_tensor<B: Backend>(latents: &[Vec<f32>], device: &B::Device) -> Tensor<B, 2> {
    let size = latents.first().map(Vec::len).unwrap_or(0);
    let flat: Vec<f32> = latents.iter().flatten().copied().collect();
    Tensor::<B, 2>::from_data(TensorData::new(flat, [latents.len(), size]), device)
}
