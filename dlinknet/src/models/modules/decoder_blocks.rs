//! # Decoder Blocks
//!
//! LinkNet decoder stage: a 1x1 squeeze, an upsampling step, a 1x1 expansion,
//! then an additive merge with the stage's skip tensor.

use burn::{
    module::Ignored,
    nn::{
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
    tensor::{
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};
use burn_extra_ops::Identity;

use crate::config::UpsampleLayer;
use crate::plan::{DecoderStagePlan, DECODER_SQUEEZE};

/// Normalization slot that is either a BatchNorm or a pass-through.
#[derive(Module, Debug)]
pub enum NormLayer<B: Backend> {
    BatchNorm(BatchNorm<B, 2>),
    Identity(Identity),
}

impl<B: Backend> NormLayer<B> {
    /// Creates a BatchNorm over `channels` when `use_batchnorm`, an Identity otherwise.
    pub fn new(channels: usize, use_batchnorm: bool, device: &Device<B>) -> Self {
        if use_batchnorm {
            Self::BatchNorm(BatchNormConfig::new(channels).init(device))
        } else {
            Self::Identity(Identity)
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::BatchNorm(bn) => bn.forward(x),
            Self::Identity(identity) => identity.forward(x),
        }
    }
}

/// Convolution, optional BatchNorm, ReLU.
#[derive(Module, Debug)]
pub struct ConvBnRelu<B: Backend> {
    conv: Conv2d<B>,
    norm: NormLayer<B>,
    relu: Relu,
}

impl<B: Backend> ConvBnRelu<B> {
    /// "Same"-padded convolution; the kernel must be odd in both dimensions.
    /// The bias is dropped when a BatchNorm follows.
    pub fn new(
        channels: [usize; 2],
        kernel_size: [usize; 2],
        use_batchnorm: bool,
        device: &Device<B>,
    ) -> Self {
        let conv = Conv2dConfig::new(channels, kernel_size)
            .with_padding(PaddingConfig2d::Explicit(
                kernel_size[0] / 2,
                kernel_size[1] / 2,
            ))
            .with_bias(!use_batchnorm)
            .init(device);

        Self {
            conv,
            norm: NormLayer::new(channels[1], use_batchnorm, device),
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.norm.forward(x);
        self.relu.forward(x)
    }
}

/// Nearest-neighbour resize followed by a spatial convolution.
#[derive(Module, Debug)]
pub struct InterpolateUpsample<B: Backend> {
    rate: Ignored<[usize; 2]>,
    conv: ConvBnRelu<B>,
}

impl<B: Backend> InterpolateUpsample<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, h, w] = x.dims();
        let x = interpolate(
            x,
            [h * self.rate[0], w * self.rate[1]],
            InterpolateOptions::new(InterpolateMode::Nearest),
        );
        self.conv.forward(x)
    }
}

/// Strided transposed convolution, optional BatchNorm, ReLU.
#[derive(Module, Debug)]
pub struct TransposeUpsample<B: Backend> {
    deconv: ConvTranspose2d<B>,
    norm: NormLayer<B>,
    relu: Relu,
}

impl<B: Backend> TransposeUpsample<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.deconv.forward(x);
        let x = self.norm.forward(x);
        self.relu.forward(x)
    }
}

/// `(padding, padding_out)` making a transposed convolution output exactly `input * stride`.
///
/// Solves `(in - 1) * s - 2p + (k - 1) + p_out + 1 = in * s`; an odd `k` keeps `p_out < s`.
pub(crate) const fn transpose_padding(kernel: usize, stride: usize) -> (usize, usize) {
    if kernel >= stride {
        let total = kernel - stride;
        let padding = total.div_ceil(2);
        (padding, 2 * padding - total)
    } else {
        (0, stride - kernel)
    }
}

#[derive(Module, Debug)]
pub enum Upsample<B: Backend> {
    Interpolate(InterpolateUpsample<B>),
    Transpose(TransposeUpsample<B>),
}

impl<B: Backend> Upsample<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::Interpolate(up) => up.forward(x),
            Self::Transpose(up) => up.forward(x),
        }
    }
}

/// Configuration for the `DecoderBlock` module.
#[derive(Config, Debug)]
pub struct DecoderBlockConfig {
    /// Number of input channels.
    in_channels: usize,
    /// Number of output channels; equal to the skip width when a skip is merged.
    out_channels: usize,
    /// Kernel of the upsampling convolution. Must be odd.
    #[config(default = "[3, 3]")]
    kernel_size: [usize; 2],
    /// `[height, width]` upsampling factor.
    #[config(default = "[2, 2]")]
    upsample_rate: [usize; 2],
    #[config(default = "UpsampleLayer::Upsampling")]
    upsample_layer: UpsampleLayer,
    #[config(default = "true")]
    use_batchnorm: bool,
}

impl DecoderBlockConfig {
    /// Configuration for one planned stage.
    pub fn from_plan(
        plan: &DecoderStagePlan,
        upsample_layer: UpsampleLayer,
        use_batchnorm: bool,
    ) -> Self {
        Self::new(plan.in_channels, plan.out_channels)
            .with_kernel_size(plan.kernel_size)
            .with_upsample_rate(plan.upsample_rate)
            .with_upsample_layer(upsample_layer)
            .with_use_batchnorm(use_batchnorm)
    }

    /// Initializes a new `DecoderBlock` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> DecoderBlock<B> {
        let mid_channels = self.in_channels / DECODER_SQUEEZE;

        let conv_in = ConvBnRelu::new(
            [self.in_channels, mid_channels],
            [1, 1],
            self.use_batchnorm,
            device,
        );

        let upsample = match self.upsample_layer {
            UpsampleLayer::Upsampling => Upsample::Interpolate(InterpolateUpsample {
                rate: Ignored(self.upsample_rate),
                conv: ConvBnRelu::new(
                    [mid_channels, mid_channels],
                    self.kernel_size,
                    self.use_batchnorm,
                    device,
                ),
            }),
            UpsampleLayer::Transpose => {
                let (pad_h, out_h) = transpose_padding(self.kernel_size[0], self.upsample_rate[0]);
                let (pad_w, out_w) = transpose_padding(self.kernel_size[1], self.upsample_rate[1]);
                let deconv = ConvTranspose2dConfig::new([mid_channels, mid_channels], self.kernel_size)
                    .with_stride(self.upsample_rate)
                    .with_padding([pad_h, pad_w])
                    .with_padding_out([out_h, out_w])
                    .with_bias(!self.use_batchnorm)
                    .init(device);

                Upsample::Transpose(TransposeUpsample {
                    deconv,
                    norm: NormLayer::new(mid_channels, self.use_batchnorm, device),
                    relu: Relu::new(),
                })
            }
        };

        let conv_out = ConvBnRelu::new(
            [mid_channels, self.out_channels],
            [1, 1],
            self.use_batchnorm,
            device,
        );

        DecoderBlock {
            conv_in,
            upsample,
            conv_out,
        }
    }
}

/// A LinkNet decoder stage.
#[derive(Module, Debug)]
pub struct DecoderBlock<B: Backend> {
    conv_in: ConvBnRelu<B>,
    upsample: Upsample<B>,
    conv_out: ConvBnRelu<B>,
}

impl<B: Backend> DecoderBlock<B> {
    /// Upsample `x` and add `skip` when present; `skip` must match the output shape.
    pub fn forward(&self, x: Tensor<B, 4>, skip: Option<Tensor<B, 4>>) -> Tensor<B, 4> {
        let x = self.conv_in.forward(x);
        let x = self.upsample.forward(x);
        let x = self.conv_out.forward(x);

        match skip {
            Some(skip) => x + skip,
            None => x,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_transpose_padding_gives_exact_scaling() {
        for kernel in [1, 3, 5, 7] {
            for stride in [1, 2, 3, 4] {
                let (padding, padding_out) = transpose_padding(kernel, stride);
                assert!(padding_out < stride);
                for input in [1, 5, 8] {
                    let out = (input - 1) * stride + (kernel - 1) + padding_out + 1 - 2 * padding;
                    assert_eq!(out, input * stride, "k={kernel} s={stride} in={input}");
                }
            }
        }
    }

    #[test]
    fn test_decoder_block_upsampling() {
        let device = Default::default();
        let block = DecoderBlockConfig::new(32, 16).init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 4>::random(
            [2, 32, 4, 6],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );
        let output = block.forward(x, None);

        assert_eq!(output.dims(), [2, 16, 8, 12]);
    }

    #[test]
    fn test_decoder_block_transpose_rectangular_rate() {
        let device = Default::default();
        let block = DecoderBlockConfig::new(16, 8)
            .with_upsample_layer(UpsampleLayer::Transpose)
            .with_upsample_rate([4, 2])
            .with_kernel_size([3, 5])
            .init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 4>::zeros([1, 16, 3, 3], &device);
        assert_eq!(block.forward(x, None).dims(), [1, 8, 12, 6]);
    }

    #[test]
    fn test_decoder_block_adds_skip() {
        let device = Default::default();
        let block = DecoderBlockConfig::new(8, 4)
            .with_use_batchnorm(false)
            .init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 4>::random(
            [1, 8, 2, 2],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );
        let skip = Tensor::<TestBackend, 4>::ones([1, 4, 4, 4], &device);

        let plain = block.forward(x.clone(), None);
        let merged = block.forward(x, Some(skip));

        let diff: f32 = (merged - plain - 1.0).abs().max().into_scalar();
        assert!(diff < 1e-5);
    }

    #[test]
    fn test_norm_layer_follows_flag() {
        let device = Default::default();
        assert!(matches!(
            NormLayer::<TestBackend>::new(4, true, &device),
            NormLayer::BatchNorm(_)
        ));
        assert!(matches!(
            NormLayer::<TestBackend>::new(4, false, &device),
            NormLayer::Identity(_)
        ));
    }
}
