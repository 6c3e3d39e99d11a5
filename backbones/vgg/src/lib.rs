//! VGG implementation for the DLinkNet encoder.
//!
//! This module provides VGG16 models adapted for use as feature extractors.
//! The implementation is based on the torchvision VGG implementation; every
//! convolution block ends in a 2x2 max pool, so block `i` runs at `1 / 2^i` scale.

use core::f64::consts::SQRT_2;

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d, Relu,
    },
    prelude::*,
};

/// Names of the feature blocks, in forward order.
pub const VGG_LAYER_NAMES: [&str; 5] = ["block1", "block2", "block3", "block4", "block5"];

/// Cumulative stride of each entry of [`VGG_LAYER_NAMES`].
pub const VGG_LAYER_REDUCTIONS: [usize; 5] = [2, 4, 8, 16, 32];

/// Output channels of each entry of [`VGG_LAYER_NAMES`].
pub const VGG16_LAYER_CHANNELS: [usize; 5] = [64, 128, 256, 512, 512];

/// Convolutions per block for VGG16.
const VGG16_CONVS: [usize; 5] = [2, 2, 3, 3, 3];

/// Number of RGB input channels.
pub const VGG_INPUT_CHANNELS: usize = 3;

/// VGG feature extractor.
///
/// `forward` returns the output of each of the five blocks; `block5` is the
/// network's final feature map.
#[derive(Module, Debug)]
pub struct VGGBackbone<B: Backend> {
    pub blocks: Vec<VGGFeatureBlock<B>>,
}

impl<B: Backend> VGGBackbone<B> {
    /// Forward pass returning every block output, shallowest first.
    pub fn forward(&self, input: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        let mut features = Vec::with_capacity(self.blocks.len());
        let mut x = input;
        for block in &self.blocks {
            x = block.forward(x);
            features.push(x.clone());
        }
        features
    }

    /// Create VGG16 backbone without batch normalization.
    pub fn vgg16(device: &Device<B>) -> Self {
        Self::new(false, device)
    }

    /// Create VGG16 backbone with batch normalization.
    pub fn vgg16_bn(device: &Device<B>) -> Self {
        Self::new(true, device)
    }

    fn new(batch_norm: bool, device: &Device<B>) -> Self {
        let mut in_channels = VGG_INPUT_CHANNELS;
        let blocks = VGG16_CONVS
            .iter()
            .zip(VGG16_LAYER_CHANNELS)
            .map(|(&convs, out_channels)| {
                let block =
                    VGGFeatureBlock::new(convs, in_channels, out_channels, batch_norm, device);
                in_channels = out_channels;
                block
            })
            .collect();

        Self { blocks }
    }
}

/// `n` conv layers followed by a 2x2 max pool.
#[derive(Module, Debug)]
pub struct VGGFeatureBlock<B: Backend> {
    convs: Vec<VGGConvLayer<B>>,
    pool: MaxPool2d,
}

impl<B: Backend> VGGFeatureBlock<B> {
    /// Forward pass through the feature block.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.convs.iter().fold(input, |x, conv| conv.forward(x));
        self.pool.forward(x)
    }

    /// Create a new VGG feature block.
    pub fn new(
        convs: usize,
        in_channels: usize,
        out_channels: usize,
        batch_norm: bool,
        device: &Device<B>,
    ) -> Self {
        let convs = (0..convs)
            .map(|i| {
                let in_channels = if i == 0 { in_channels } else { out_channels };
                VGGConvLayer::new(in_channels, out_channels, batch_norm, device)
            })
            .collect();
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();

        Self { convs, pool }
    }
}

/// VGG convolution layer with optional batch normalization.
#[derive(Module, Debug)]
pub struct VGGConvLayer<B: Backend> {
    conv: Conv2d<B>,
    batch_norm: Option<BatchNorm<B, 2>>,
    relu: Relu,
}

impl<B: Backend> VGGConvLayer<B> {
    /// Forward pass through the convolution layer.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv.forward(input);
        let out = match &self.batch_norm {
            Some(bn) => bn.forward(out),
            None => out,
        };
        self.relu.forward(out)
    }

    /// Create a new VGG convolution layer.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        batch_norm: bool,
        device: &Device<B>,
    ) -> Self {
        let initializer = Initializer::KaimingNormal {
            gain: SQRT_2,
            fan_out_only: true,
        };

        // 3x3 conv, stride=1, padding=1
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_stride([1, 1])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(!batch_norm) // No bias when using batch norm
            .with_initializer(initializer)
            .init(device);

        let batch_norm = batch_norm.then(|| BatchNormConfig::new(out_channels).init(device));

        Self {
            conv,
            batch_norm,
            relu: Relu::new(),
        }
    }
}

/// VGG configuration
#[derive(Config, Debug)]
pub struct VggConfig {
    /// Use batch normalization
    #[config(default = "false")]
    pub batch_norm: bool,
}

impl VggConfig {
    /// VGG16 configuration
    pub fn vgg16() -> Self {
        Self::new()
    }

    /// VGG16-BN configuration
    pub fn vgg16_bn() -> Self {
        Self::new().with_batch_norm(true)
    }

    /// Initialize VGG model
    pub fn init<B: Backend>(&self, device: &B::Device) -> VGGBackbone<B> {
        VGGBackbone::new(self.batch_norm, device)
    }
}

#[cfg(test)]
mod tests {
    use burn::{backend::NdArray, tensor::Distribution};

    use super::*;

    type TestBackend = NdArray<f32>;

    #[test]
    fn vgg16_config_disables_batch_norm_by_default() {
        assert!(!VggConfig::vgg16().batch_norm);
        assert!(VggConfig::vgg16_bn().batch_norm);
    }

    #[test]
    fn vgg16_forward_returns_correct_feature_shapes() {
        let device = Default::default();
        let model = VGGBackbone::vgg16(&device);

        let input =
            Tensor::<TestBackend, 4>::random([1, 3, 64, 64], Distribution::Normal(0.0, 1.0), &device);
        let output = model.forward(input);

        assert_eq!(output.len(), 5);
        assert_eq!(output[0].dims(), [1, 64, 32, 32]);
        assert_eq!(output[1].dims(), [1, 128, 16, 16]);
        assert_eq!(output[2].dims(), [1, 256, 8, 8]);
        assert_eq!(output[3].dims(), [1, 512, 4, 4]);
        assert_eq!(output[4].dims(), [1, 512, 2, 2]);
    }

    #[test]
    fn vgg16_bn_has_thirteen_convolutions() {
        let device = Default::default();
        let model = VGGBackbone::<TestBackend>::vgg16_bn(&device);

        let convs: usize = model.blocks.iter().map(|block| block.convs.len()).sum();
        assert_eq!(convs, 13);
        assert!(model.blocks[0].convs[0].batch_norm.is_some());
    }
}
