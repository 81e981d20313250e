use crate::model::layers::{conv, conv_out, dense, KERNEL_SIZE};
use burn::nn::conv::Conv2d;
use burn::nn::Linear;
use burn::prelude::*;
use burn::tensor::activation::leaky_relu;

/// Configuration for the Wasserstein critic.
#[derive(Config, Debug)]
pub struct DiscriminatorConfig {
    pub image_size: usize,
    pub layers: usize,
    #[config(default = 64)]
    pub critic_dim: usize,
    #[config(default = 1)]
    pub stride: usize,
    #[config(default = 0.2)]
    pub leaky_slope: f64,
}

/// Critic scoring images with a single unbounded value each.
#[derive(Module, Debug)]
pub struct Discriminator<B: Backend> {
    convs: Vec<Conv2d<B>>,
    fc: Linear<B>,
    #[module(ignore)]
    leaky_slope: f64,
}

impl DiscriminatorConfig {
    /// Output channels of each convolution, halving from `critic_dim`.
    pub fn stage_channels(&self) -> Vec<usize> {
        (0..self.layers)
            .map(|idx| (self.critic_dim >> idx).max(1))
            .collect()
    }

    /// Length of the flattened final feature map.
    pub fn flat_dim(&self) -> usize {
        let mut size = self.image_size;
        for _ in 0..self.layers {
            size = conv_out(size, KERNEL_SIZE, self.stride, 1);
        }
        let channels = self.stage_channels().last().copied().unwrap_or(3);
        size * size * channels
    }

    /// Initialize the critic layers on the given device.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Discriminator<B> {
        let mut convs = Vec::with_capacity(self.layers);
        let mut in_channels = 3;
        for out_channels in self.stage_channels() {
            convs.push(conv(in_channels, out_channels, self.stride, device));
            in_channels = out_channels;
        }

        let fc = dense(self.flat_dim(), 1, device);

        Discriminator {
            convs,
            fc,
            leaky_slope: self.leaky_slope,
        }
    }
}

impl<B: Backend> Discriminator<B> {
    /// Score `[batch, 3, size, size]` images, returning `[batch, 1]`.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = images;
        for conv in &self.convs {
            x = leaky_relu(conv.forward(x), self.leaky_slope);
        }

        let [batch, channels, height, width] = x.dims();
        let flat = x.reshape([batch, channels * height * width]);
        self.fc.forward(flat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    #[test]
    fn channels_halve_per_stage() {
        let config = DiscriminatorConfig::new(32, 3);
        assert_eq!(config.stage_channels(), vec![64, 32, 16]);
        assert_eq!(config.flat_dim(), 32 * 32 * 16);
    }

    #[test]
    fn strided_critic_downsamples() {
        let config = DiscriminatorConfig::new(32, 3).with_stride(2);
        assert_eq!(config.flat_dim(), 4 * 4 * 16);
    }

    #[test]
    fn scores_one_value_per_image() {
        let device = Default::default();
        let critic = DiscriminatorConfig::new(16, 2)
            .with_critic_dim(8)
            .init::<TestBackend>(&device);

        let images =
            Tensor::<TestBackend, 4>::random([5, 3, 16, 16], Distribution::Default, &device);
        assert_eq!(critic.forward(images).dims(), [5, 1]);
    }

    #[test]
    fn scores_are_not_squashed() {
        let device = Default::default();
        let critic = DiscriminatorConfig::new(8, 1)
            .with_critic_dim(4)
            .init::<TestBackend>(&device);

        // Scaling a positive-slope piecewise-linear network's input scales its
        // output (up to the bias), so large inputs must leave [-1, 1].
        let images = Tensor::<TestBackend, 4>::random(
            [4, 3, 8, 8],
            Distribution::Uniform(0.0, 1.0),
            &device,
        )
        .mul_scalar(1.0e4);
        let scores = critic.forward(images).into_data().to_vec::<f32>().unwrap();
        assert!(scores.iter().any(|s| s.abs() > 1.0));
    }
}
