//! Wasserstein GAN with gradient penalty, trained on folders of images with Burn.

pub mod data;
pub mod latent;
pub mod model;
pub mod training;
pub mod utils;
