//! ResNet implementation for the DLinkNet encoder.
//!
//! This module provides ResNet models adapted for use as feature extractors.
//! The implementation is based on the official torchvision ResNet implementation,
//! with the stem split so that its half-resolution activation can feed a skip connection.

use burn::nn::{
    conv::{Conv2d, Conv2dConfig},
    pool::{MaxPool2d, MaxPool2dConfig},
    BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d, Relu,
};
use burn::prelude::*;
use core::f64::consts::SQRT_2;

mod blocks;
pub use blocks::*;

// ResNet residual layer block configs
const RESNET18_BLOCKS: [usize; 4] = [2, 2, 2, 2];
const RESNET34_BLOCKS: [usize; 4] = [3, 4, 6, 3];
const RESNET50_BLOCKS: [usize; 4] = [3, 4, 6, 3];
const RESNET101_BLOCKS: [usize; 4] = [3, 4, 23, 3];
const RESNET152_BLOCKS: [usize; 4] = [3, 8, 36, 3];

/// Names of the feature layers, in forward order.
pub const RESNET_LAYER_NAMES: [&str; 6] = ["stem", "pool", "layer1", "layer2", "layer3", "layer4"];

/// Cumulative stride of each entry of [`RESNET_LAYER_NAMES`].
pub const RESNET_LAYER_REDUCTIONS: [usize; 6] = [2, 4, 4, 8, 16, 32];

/// Number of RGB input channels.
pub const RESNET_INPUT_CHANNELS: usize = 3;

/// ResNet feature extractor.
///
/// `forward` returns one tensor per entry of [`RESNET_LAYER_NAMES`]; the last one (`layer4`)
/// is the network's final feature map.
/// Derived from torchvision.models.resnet.ResNet
#[derive(Module, Debug)]
pub struct ResNetBackbone<B: Backend> {
    /// conv1 + bn1 + relu (1/2 scale)
    pub stem: Stem<B>,
    /// 3x3 max pool (1/4 scale)
    pub maxpool: MaxPool2d,
    pub layer1: LayerBlock<B>,
    pub layer2: LayerBlock<B>,
    pub layer3: LayerBlock<B>,
    pub layer4: LayerBlock<B>,
    expansion: usize,
}

impl<B: Backend> ResNetBackbone<B> {
    /// Forward pass returning every named feature level, stem first.
    pub fn forward(&self, input: Tensor<B, 4>) -> [Tensor<B, 4>; 6] {
        let stem = self.stem.forward(input);
        let pool = self.maxpool.forward(stem.clone());
        let layer1 = self.layer1.forward(pool.clone());
        let layer2 = self.layer2.forward(layer1.clone());
        let layer3 = self.layer3.forward(layer2.clone());
        let layer4 = self.layer4.forward(layer3.clone());

        [stem, pool, layer1, layer2, layer3, layer4]
    }

    /// Output channels of each entry of [`RESNET_LAYER_NAMES`].
    pub fn layer_channels(&self) -> [usize; 6] {
        let e = self.expansion;
        [64, 64, 64 * e, 128 * e, 256 * e, 512 * e]
    }

    /// Create ResNet-18 backbone.
    pub fn resnet18(device: &Device<B>) -> Self {
        Self::new(RESNET18_BLOCKS, 1, device)
    }

    /// Create ResNet-34 backbone.
    pub fn resnet34(device: &Device<B>) -> Self {
        Self::new(RESNET34_BLOCKS, 1, device)
    }

    /// Create ResNet-50 backbone.
    pub fn resnet50(device: &Device<B>) -> Self {
        Self::new(RESNET50_BLOCKS, 4, device)
    }

    /// Create ResNet-101 backbone.
    pub fn resnet101(device: &Device<B>) -> Self {
        Self::new(RESNET101_BLOCKS, 4, device)
    }

    /// Create ResNet-152 backbone.
    pub fn resnet152(device: &Device<B>) -> Self {
        Self::new(RESNET152_BLOCKS, 4, device)
    }

    fn new(blocks: [usize; 4], expansion: usize, device: &Device<B>) -> Self {
        assert!(
            expansion == 1 || expansion == 4,
            "ResNet backbone only supports expansion values [1, 4] for residual blocks"
        );

        let bottleneck = expansion > 1;
        let widths = [64, 128, 256, 512].map(|w| w * expansion);

        // 3x3 maxpool, stride=2, padding=1
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        Self {
            stem: Stem::new(RESNET_INPUT_CHANNELS, 64, device),
            maxpool,
            layer1: LayerBlock::new(blocks[0], 64, widths[0], 1, bottleneck, device),
            layer2: LayerBlock::new(blocks[1], widths[0], widths[1], 2, bottleneck, device),
            layer3: LayerBlock::new(blocks[2], widths[1], widths[2], 2, bottleneck, device),
            layer4: LayerBlock::new(blocks[3], widths[2], widths[3], 2, bottleneck, device),
            expansion,
        }
    }
}

/// Stem: 7x7 conv (stride 2) + bn1 + relu.
#[derive(Module, Debug)]
pub struct Stem<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    relu: Relu,
}

impl<B: Backend> Stem<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv1.forward(input);
        let out = self.bn1.forward(out);
        self.relu.forward(out)
    }

    /// Create a new Stem.
    pub fn new(in_channels: usize, out_channels: usize, device: &Device<B>) -> Self {
        let conv1 = Conv2dConfig::new([in_channels, out_channels], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .with_initializer(Initializer::KaimingNormal {
                gain: SQRT_2,
                fan_out_only: true,
            })
            .init(device);

        Self {
            conv1,
            bn1: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
        }
    }
}

/// ResNet configuration
#[derive(Config, Debug)]
pub struct ResNetConfig {
    /// Number of residual blocks in each layer, e.g. [3, 4, 6, 3] for ResNet50
    pub layers: [usize; 4],
    /// Use bottleneck blocks (expansion 4) instead of basic blocks
    #[config(default = "false")]
    pub bottleneck: bool,
}

impl ResNetConfig {
    /// ResNet18 configuration
    pub fn resnet18() -> Self {
        Self::new(RESNET18_BLOCKS)
    }

    /// ResNet34 configuration
    pub fn resnet34() -> Self {
        Self::new(RESNET34_BLOCKS)
    }

    /// ResNet50 configuration
    pub fn resnet50() -> Self {
        Self::new(RESNET50_BLOCKS).with_bottleneck(true)
    }

    /// ResNet101 configuration
    pub fn resnet101() -> Self {
        Self::new(RESNET101_BLOCKS).with_bottleneck(true)
    }

    /// ResNet152 configuration
    pub fn resnet152() -> Self {
        Self::new(RESNET152_BLOCKS).with_bottleneck(true)
    }

    /// Initialize ResNet model
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNetBackbone<B> {
        let expansion = if self.bottleneck { 4 } else { 1 };
        ResNetBackbone::new(self.layers, expansion, device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_resnet_config() {
        let config = ResNetConfig::resnet50();
        assert_eq!(config.layers, [3, 4, 6, 3]);
        assert!(config.bottleneck);
        assert!(!ResNetConfig::resnet34().bottleneck);
    }

    #[test]
    fn test_resnet18_forward() {
        let device = Default::default();
        let model = ResNetBackbone::resnet18(&device);

        let input = Tensor::<TestBackend, 4>::random(
            [1, 3, 64, 64],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );
        let output = model.forward(input);

        assert_eq!(output[0].dims(), [1, 64, 32, 32]); // stem: 64/2
        assert_eq!(output[1].dims(), [1, 64, 16, 16]); // pool: 64/4
        assert_eq!(output[2].dims(), [1, 64, 16, 16]);
        assert_eq!(output[3].dims(), [1, 128, 8, 8]);
        assert_eq!(output[4].dims(), [1, 256, 4, 4]);
        assert_eq!(output[5].dims(), [1, 512, 2, 2]);
    }

    #[test]
    fn test_layer_channels_follow_expansion() {
        let device = Default::default();
        let resnet18 = ResNetConfig::resnet18().init::<TestBackend>(&device);
        assert_eq!(resnet18.layer_channels(), [64, 64, 64, 128, 256, 512]);

        let resnet50 = ResNetConfig::resnet50().init::<TestBackend>(&device);
        assert_eq!(resnet50.layer_channels(), [64, 64, 256, 512, 1024, 2048]);
    }

    #[test]
    fn test_reductions_match_forward() {
        let device = Default::default();
        let model = ResNetBackbone::<TestBackend>::resnet18(&device);
        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 64, 64], &device);

        for (feature, reduction) in model.forward(input).iter().zip(RESNET_LAYER_REDUCTIONS) {
            let [_, _, h, w] = feature.dims();
            assert_eq!([h, w], [64 / reduction, 64 / reduction]);
        }
    }
}
