//! # Dilated Bottleneck
//!
//! The D-block sitting between the encoder and the decoder. Four cascaded
//! dilated 3x3 convolutions widen the receptive field; the block input and
//! every intermediate output are summed, so spatial size and width are kept.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        PaddingConfig2d,
    },
    prelude::*,
};

/// Dilation of each convolution in the cascade.
pub const DILATION_RATES: [usize; 4] = [1, 2, 4, 8];

/// Configuration for the `DilatedBottleneck` module.
#[derive(Config, Debug)]
pub struct DilatedBottleneckConfig {
    /// Width of the input and output feature map.
    channels: usize,
}

impl DilatedBottleneckConfig {
    /// Initializes a new `DilatedBottleneck` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> DilatedBottleneck<B> {
        let [dilate_conv1, dilate_conv2, dilate_conv3, dilate_conv4] =
            DILATION_RATES.map(|rate| self.dilated_conv(rate, device));

        DilatedBottleneck {
            dilate_conv1,
            dilate_conv2,
            dilate_conv3,
            dilate_conv4,
        }
    }

    fn dilated_conv<B: Backend>(&self, rate: usize, device: &Device<B>) -> Conv2d<B> {
        Conv2dConfig::new([self.channels, self.channels], [3, 3])
            .with_dilation([rate, rate])
            .with_padding(PaddingConfig2d::Explicit(rate, rate))
            .init(device)
    }
}

#[derive(Module, Debug)]
pub struct DilatedBottleneck<B: Backend> {
    dilate_conv1: Conv2d<B>,
    dilate_conv2: Conv2d<B>,
    dilate_conv3: Conv2d<B>,
    dilate_conv4: Conv2d<B>,
}

impl<B: Backend> DilatedBottleneck<B> {
    /// `x + d1 + d2 + d4 + d8`, each `dN` being the cascade output at dilation `N`.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let d1 = self.dilate_conv1.forward(x.clone());
        let d2 = self.dilate_conv2.forward(d1.clone());
        let d4 = self.dilate_conv3.forward(d2.clone());
        let d8 = self.dilate_conv4.forward(d4.clone());

        x + d1 + d2 + d4 + d8
    }

    pub fn dilations(&self) -> [usize; 4] {
        [
            self.dilate_conv1.dilation[0],
            self.dilate_conv2.dilation[0],
            self.dilate_conv3.dilation[0],
            self.dilate_conv4.dilation[0],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_bottleneck_preserves_shape() {
        let device = Default::default();
        let bottleneck = DilatedBottleneckConfig::new(8).init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 4>::random(
            [2, 8, 5, 7],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );
        assert_eq!(bottleneck.forward(x).dims(), [2, 8, 5, 7]);
    }

    #[test]
    fn test_bottleneck_dilations() {
        let device = Default::default();
        let bottleneck = DilatedBottleneckConfig::new(4).init::<TestBackend>(&device);

        assert_eq!(bottleneck.dilations(), DILATION_RATES);
    }

    #[test]
    fn test_bottleneck_on_single_pixel() {
        // Dilation far larger than the map must still keep a 1x1 input at 1x1.
        let device = Default::default();
        let bottleneck = DilatedBottleneckConfig::new(4).init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 4>::ones([1, 4, 1, 1], &device);
        assert_eq!(bottleneck.forward(x).dims(), [1, 4, 1, 1]);
    }
}
