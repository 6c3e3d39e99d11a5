//! Final projection from decoder features to the class map.

use burn::{
    module::Ignored,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        PaddingConfig2d,
    },
    prelude::*,
};

use crate::config::ActivationKind;

/// Configuration for the `SegmentationHead` module.
#[derive(Config, Debug)]
pub struct SegmentationHeadConfig {
    in_channels: usize,
    classes: usize,
    #[config(default = "ActivationKind::Sigmoid")]
    activation: ActivationKind,
}

impl SegmentationHeadConfig {
    /// Initializes a new `SegmentationHead` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SegmentationHead<B> {
        let conv = Conv2dConfig::new([self.in_channels, self.classes], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);

        SegmentationHead {
            conv,
            activation: Ignored(self.activation),
        }
    }
}

/// 3x3 convolution to `classes` channels followed by the output activation.
#[derive(Module, Debug)]
pub struct SegmentationHead<B: Backend> {
    conv: Conv2d<B>,
    activation: Ignored<ActivationKind>,
}

impl<B: Backend> SegmentationHead<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.activation.apply(self.conv.forward(x))
    }

    pub fn activation(&self) -> ActivationKind {
        *self.activation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_head_projects_to_classes() {
        let device = Default::default();
        let head = SegmentationHeadConfig::new(16, 3)
            .with_activation(ActivationKind::Linear)
            .init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 4>::zeros([2, 16, 10, 6], &device);
        assert_eq!(head.forward(x).dims(), [2, 3, 10, 6]);
        assert_eq!(head.activation(), ActivationKind::Linear);
    }

    #[test]
    fn test_head_sigmoid_range() {
        let device = Default::default();
        let head = SegmentationHeadConfig::new(4, 1).init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 4>::random(
            [1, 4, 8, 8],
            burn::tensor::Distribution::Normal(0.0, 10.0),
            &device,
        );
        let y = head.forward(x);

        let min: f32 = y.clone().min().into_scalar();
        let max: f32 = y.max().into_scalar();
        assert!(min >= 0.0 && max <= 1.0);
    }
}
