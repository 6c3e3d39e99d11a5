//! ResNet block implementations.
//!
//! This module contains the building blocks for ResNet: BasicBlock, Bottleneck, and LayerBlock.

use core::f64::consts::SQRT_2;

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d, Relu,
    },
    prelude::*,
};

/// Bias-free convolution followed by batch norm, the unit every ResNet block is made of.
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> ConvBn<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(input))
    }

    /// Create a new ConvBn with a square kernel and symmetric padding.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        device: &Device<B>,
    ) -> Self {
        let padding = kernel_size / 2;
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_bias(false)
            .with_initializer(Initializer::KaimingNormal {
                gain: SQRT_2,
                fan_out_only: true,
            })
            .init(device);
        let bn = BatchNormConfig::new(out_channels).init(device);

        Self { conv, bn }
    }
}

#[derive(Module, Debug)]
pub enum ResidualBlock<B: Backend> {
    /// A bottleneck residual block.
    Bottleneck(Bottleneck<B>),
    /// A basic residual block.
    Basic(BasicBlock<B>),
}

impl<B: Backend> ResidualBlock<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::Basic(block) => block.forward(input),
            Self::Bottleneck(block) => block.forward(input),
        }
    }

    fn new(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        bottleneck: bool,
        device: &Device<B>,
    ) -> Self {
        if bottleneck {
            Self::Bottleneck(Bottleneck::new(in_channels, out_channels, stride, device))
        } else {
            Self::Basic(BasicBlock::new(in_channels, out_channels, stride, device))
        }
    }
}

/// Projection shortcut, present only when the residual changes stride or width.
fn shortcut<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    stride: usize,
    device: &Device<B>,
) -> Option<ConvBn<B>> {
    (stride != 1 || in_channels != out_channels)
        .then(|| ConvBn::new(in_channels, out_channels, 1, stride, device))
}

/// ResNet basic residual block implementation.
/// Derived from torchvision.models.resnet.BasicBlock
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: ConvBn<B>,
    conv2: ConvBn<B>,
    relu: Relu,
    downsample: Option<ConvBn<B>>,
}

impl<B: Backend> BasicBlock<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(input.clone()),
            None => input.clone(),
        };

        let out = self.relu.forward(self.conv1.forward(input));
        let out = self.conv2.forward(out);

        self.relu.forward(out + identity)
    }

    /// Create a new BasicBlock.
    pub fn new(in_channels: usize, out_channels: usize, stride: usize, device: &Device<B>) -> Self {
        Self {
            conv1: ConvBn::new(in_channels, out_channels, 3, stride, device),
            conv2: ConvBn::new(out_channels, out_channels, 3, 1, device),
            relu: Relu::new(),
            downsample: shortcut(in_channels, out_channels, stride, device),
        }
    }
}

/// ResNet bottleneck residual block implementation.
/// Derived from torchvision.models.resnet.Bottleneck
///
/// The stride sits on the 3x3 convolution (ResNet V1.5).
#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    conv1: ConvBn<B>,
    conv2: ConvBn<B>,
    conv3: ConvBn<B>,
    relu: Relu,
    downsample: Option<ConvBn<B>>,
}

impl<B: Backend> Bottleneck<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(input.clone()),
            None => input.clone(),
        };

        let out = self.relu.forward(self.conv1.forward(input));
        let out = self.relu.forward(self.conv2.forward(out));
        let out = self.conv3.forward(out);

        self.relu.forward(out + identity)
    }

    /// Create a new Bottleneck.
    pub fn new(in_channels: usize, out_channels: usize, stride: usize, device: &Device<B>) -> Self {
        // expansion = 4
        let width = out_channels / 4;

        Self {
            conv1: ConvBn::new(in_channels, width, 1, 1, device),
            conv2: ConvBn::new(width, width, 3, stride, device),
            conv3: ConvBn::new(width, out_channels, 1, 1, device),
            relu: Relu::new(),
            downsample: shortcut(in_channels, out_channels, stride, device),
        }
    }
}

/// Collection of sequential residual blocks.
#[derive(Module, Debug)]
pub struct LayerBlock<B: Backend> {
    blocks: Vec<ResidualBlock<B>>,
}

impl<B: Backend> LayerBlock<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks
            .iter()
            .fold(input, |out, block| block.forward(out))
    }

    /// Create a new LayerBlock. Only the first block applies `stride`.
    pub fn new(
        num_blocks: usize,
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        bottleneck: bool,
        device: &Device<B>,
    ) -> Self {
        let blocks = (0..num_blocks)
            .map(|b| {
                if b == 0 {
                    ResidualBlock::new(in_channels, out_channels, stride, bottleneck, device)
                } else {
                    ResidualBlock::new(out_channels, out_channels, 1, bottleneck, device)
                }
            })
            .collect();

        Self { blocks }
    }

    /// Number of residual blocks in this layer.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether this layer has no residual blocks.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn basic_block_with_stride_halves_resolution() {
        let device = Default::default();
        let block = BasicBlock::<TestBackend>::new(8, 16, 2, &device);
        let input = Tensor::<TestBackend, 4>::zeros([1, 8, 16, 16], &device);

        assert_eq!(block.forward(input).dims(), [1, 16, 8, 8]);
    }

    #[test]
    fn bottleneck_keeps_shape_without_stride() {
        let device = Default::default();
        let block = Bottleneck::<TestBackend>::new(16, 16, 1, &device);
        assert!(block.downsample.is_none());

        let input = Tensor::<TestBackend, 4>::zeros([1, 16, 8, 8], &device);
        assert_eq!(block.forward(input).dims(), [1, 16, 8, 8]);
    }

    #[test]
    fn layer_block_strides_only_first_block() {
        let device = Default::default();
        let layer = LayerBlock::<TestBackend>::new(3, 8, 8, 2, false, &device);
        assert_eq!(layer.len(), 3);

        let input = Tensor::<TestBackend, 4>::zeros([1, 8, 16, 16], &device);
        assert_eq!(layer.forward(input).dims(), [1, 8, 8, 8]);
    }
}
