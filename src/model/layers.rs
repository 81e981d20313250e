use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::{Initializer, Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::*;

/// Kernel size shared by every convolution in both networks.
pub const KERNEL_SIZE: usize = 3;

/// Variance-scaling initializer (factor 2 over fan-in, normal), i.e. He normal.
pub fn variance_scaling() -> Initializer {
    Initializer::KaimingNormal {
        gain: std::f64::consts::SQRT_2,
        fan_out_only: false,
    }
}

/// Fully-connected layer with variance-scaled weights and bias.
pub fn dense<B: Backend>(d_input: usize, d_output: usize, device: &B::Device) -> Linear<B> {
    LinearConfig::new(d_input, d_output)
        .with_initializer(variance_scaling())
        .init(device)
}

/// 3x3 convolution with one pixel of zero padding ("same" at stride 1).
pub fn conv<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    stride: usize,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [KERNEL_SIZE, KERNEL_SIZE])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_initializer(variance_scaling())
        .init(device)
}

/// 3x3 transposed convolution that exactly doubles height and width.
pub fn upconv<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    device: &B::Device,
) -> ConvTranspose2d<B> {
    // out = (in - 1) * 2 - 2 * 1 + 3 + 1 = 2 * in
    ConvTranspose2dConfig::new([in_channels, out_channels], [KERNEL_SIZE, KERNEL_SIZE])
        .with_stride([2, 2])
        .with_padding([1, 1])
        .with_padding_out([1, 1])
        .with_initializer(variance_scaling())
        .init(device)
}

/// Spatial size after a convolution.
pub fn conv_out(input: usize, kernel: usize, stride: usize, padding: usize) -> usize {
    (input + 2 * padding - (kernel - 1) - 1) / stride + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_conv_keeps_size_at_stride_one() {
        assert_eq!(conv_out(32, KERNEL_SIZE, 1, 1), 32);
        assert_eq!(conv_out(7, KERNEL_SIZE, 1, 1), 7);
    }

    #[test]
    fn padded_conv_halves_size_at_stride_two() {
        assert_eq!(conv_out(32, KERNEL_SIZE, 2, 1), 16);
        assert_eq!(conv_out(5, KERNEL_SIZE, 2, 1), 3);
        assert_eq!(conv_out(1, KERNEL_SIZE, 2, 1), 1);
    }
}
