use crate::model::layers::{dense, upconv};
use burn::nn::conv::ConvTranspose2d;
use burn::nn::Linear;
use burn::prelude::*;
use burn::tensor::activation::{relu, sigmoid};

/// Configuration for the projection + transposed-convolution generator.
#[derive(Config, Debug)]
pub struct GeneratorConfig {
    pub latent_size: usize,
    pub image_size: usize,
    pub layers: usize,
}

/// Maps latent vectors to RGB images with values in [0, 1].
#[derive(Module, Debug)]
pub struct Generator<B: Backend> {
    project: Linear<B>,
    deconvs: Vec<ConvTranspose2d<B>>,
    #[module(ignore)]
    base_size: usize,
    #[module(ignore)]
    base_channels: usize,
}

impl GeneratorConfig {
    /// Side length of the tensor the projection is reshaped into, 0 when
    /// `layers` halvings do not fit the image size.
    pub fn base_size(&self) -> usize {
        u32::try_from(self.layers)
            .ok()
            .and_then(|layers| self.image_size.checked_shr(layers))
            .unwrap_or(0)
    }

    /// Channel count of the reshaped projection.
    pub fn base_channels(&self) -> usize {
        self.projection_size() / (self.base_size() * self.base_size()).max(1)
    }

    /// Width of the fully-connected projection: `image_size^2 * 4`.
    pub fn projection_size(&self) -> usize {
        self.image_size * self.image_size * 4
    }

    /// Output channels of every transposed convolution, last one being RGB.
    pub fn stage_channels(&self) -> Vec<usize> {
        let mut channels = Vec::with_capacity(self.layers);
        let mut current = self.base_channels();
        for _ in 1..self.layers {
            current = (current / 2).max(1);
            channels.push(current);
        }
        channels.push(3);
        channels
    }

    /// Initialize generator layers on the given device.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Generator<B> {
        let project = dense(self.latent_size, self.projection_size(), device);

        let mut deconvs = Vec::with_capacity(self.layers);
        let mut in_channels = self.base_channels();
        for out_channels in self.stage_channels() {
            deconvs.push(upconv(in_channels, out_channels, device));
            in_channels = out_channels;
        }

        Generator {
            project,
            deconvs,
            base_size: self.base_size(),
            base_channels: self.base_channels(),
        }
    }
}

impl<B: Backend> Generator<B> {
    /// Render `[batch, latent]` latents into `[batch, 3, size, size]` images.
    pub fn forward(&self, latents: Tensor<B, 2>) -> Tensor<B, 4> {
        let [batch, _] = latents.dims();
        let projected = self.project.forward(latents);
        let mut x = projected.reshape([batch, self.base_channels, self.base_size, self.base_size]);

        let last = self.deconvs.len() - 1;
        for (idx, deconv) in self.deconvs.iter().enumerate() {
            x = deconv.forward(x);
            x = if idx == last { sigmoid(x) } else { relu(x) };
        }
        x
    }
}
