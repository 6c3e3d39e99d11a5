//! Enumeration types for DLinkNet configuration.
//!
//! This module contains all the enumeration types that define various
//! configuration options for the DLinkNet model.

use core::str::FromStr;

use burn::{prelude::*, tensor::activation};

use crate::error::DLinkNetError;

/// A reference to a backbone layer whose output feeds a decoder stage.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum SkipConnection {
    /// Look the layer up by its unique name.
    Name(String),
    /// Use the layer at this position of the backbone's layer list.
    Index(usize),
}

impl From<&str> for SkipConnection {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for SkipConnection {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<usize> for SkipConnection {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// Output width of a decoder stage.
#[derive(Config, Debug, Copy, PartialEq, Eq)]
pub enum DecoderFilters {
    /// Match the channel count of the stage's skip layer.
    Auto,
    /// A fixed channel count.
    ///
    /// On a stage that merges a skip layer the count must equal that layer's
    /// width, otherwise planning fails with `InvalidConfiguration`. The value
    /// is never silently replaced by the skip width; use `Auto` for that.
    Fixed(usize),
}

/// Spatial upsampling factor of a decoder stage.
#[derive(Config, Debug, Copy, PartialEq, Eq)]
pub enum UpsampleRate {
    /// The same factor along height and width.
    Uniform(usize),
    /// Separate `[height, width]` factors.
    PerAxis([usize; 2]),
}

impl UpsampleRate {
    /// The rate as a `[height, width]` pair.
    #[must_use]
    pub const fn to_pair(&self) -> [usize; 2] {
        match *self {
            Self::Uniform(rate) => [rate, rate],
            Self::PerAxis(pair) => pair,
        }
    }
}

impl From<usize> for UpsampleRate {
    fn from(rate: usize) -> Self {
        Self::Uniform(rate)
    }
}

impl From<[usize; 2]> for UpsampleRate {
    fn from(pair: [usize; 2]) -> Self {
        Self::PerAxis(pair)
    }
}

/// How a decoder stage grows its input.
#[derive(Config, Debug, Copy, PartialEq, Eq)]
pub enum UpsampleLayer {
    /// Nearest-neighbour interpolation followed by a convolution.
    Upsampling,
    /// A learned transposed convolution.
    Transpose,
}

impl FromStr for UpsampleLayer {
    type Err = DLinkNetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upsampling" => Ok(Self::Upsampling),
            "transpose" => Ok(Self::Transpose),
            _ => Err(DLinkNetError::UnsupportedUpsampleLayer {
                name: s.to_string(),
            }),
        }
    }
}

/// The pointwise nonlinearity applied to the class map.
#[derive(Config, Debug, Copy, PartialEq, Eq)]
pub enum ActivationKind {
    /// Independent per-class probabilities.
    Sigmoid,
    /// Probabilities normalized across the class channel.
    Softmax,
    Relu,
    Tanh,
    /// Raw logits.
    Linear,
}

impl ActivationKind {
    /// Apply the activation to a `[batch, classes, height, width]` tensor.
    pub fn apply<B: Backend>(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::Sigmoid => activation::sigmoid(x),
            Self::Softmax => activation::softmax(x, 1),
            Self::Relu => activation::relu(x),
            Self::Tanh => activation::tanh(x),
            Self::Linear => x,
        }
    }

    /// The lowercase name this activation parses from.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sigmoid => "sigmoid",
            Self::Softmax => "softmax",
            Self::Relu => "relu",
            Self::Tanh => "tanh",
            Self::Linear => "linear",
        }
    }
}

impl FromStr for ActivationKind {
    type Err = DLinkNetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sigmoid" => Ok(Self::Sigmoid),
            "softmax" => Ok(Self::Softmax),
            "relu" => Ok(Self::Relu),
            "tanh" => Ok(Self::Tanh),
            "linear" => Ok(Self::Linear),
            _ => Err(DLinkNetError::UnsupportedActivation {
                name: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_upsample_rate_broadcasts_scalar() {
        assert_eq!(UpsampleRate::Uniform(2).to_pair(), [2, 2]);
        assert_eq!(UpsampleRate::from([4, 1]).to_pair(), [4, 1]);
    }

    #[test]
    fn test_upsample_layer_names() {
        assert_eq!("upsampling".parse::<UpsampleLayer>().ok(), Some(UpsampleLayer::Upsampling));
        assert_eq!("transpose".parse::<UpsampleLayer>().ok(), Some(UpsampleLayer::Transpose));

        match "bilinear".parse::<UpsampleLayer>() {
            Err(DLinkNetError::UnsupportedUpsampleLayer { name }) => assert_eq!(name, "bilinear"),
            other => panic!("Expected UnsupportedUpsampleLayer error, got {other:?}"),
        }
    }

    #[test]
    fn test_activation_names_round_trip() {
        for kind in [
            ActivationKind::Sigmoid,
            ActivationKind::Softmax,
            ActivationKind::Relu,
            ActivationKind::Tanh,
            ActivationKind::Linear,
        ] {
            assert_eq!(kind.name().parse::<ActivationKind>().ok(), Some(kind));
        }
        assert!(matches!(
            "swish".parse::<ActivationKind>(),
            Err(DLinkNetError::UnsupportedActivation { .. })
        ));
    }

    #[test]
    fn test_softmax_normalizes_over_classes() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::random(
            [2, 3, 4, 4],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );

        let sums = ActivationKind::Softmax.apply(x).sum_dim(1);
        assert_eq!(sums.dims(), [2, 1, 4, 4]);

        let max_err: f32 = (sums - 1.0).abs().max().into_scalar();
        assert!(max_err < 1e-5);
    }

    #[test]
    fn test_sigmoid_bounds() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::from_floats([[[[-100.0, 0.0, 100.0]]]], &device);

        let y = ActivationKind::Sigmoid.apply(x);
        let values = y.into_data().to_vec::<f32>().unwrap();
        assert!(values[0] >= 0.0 && values[0] < 1e-6);
        assert!((values[1] - 0.5).abs() < 1e-6);
        assert!(values[2] <= 1.0 && values[2] > 1.0 - 1e-6);
    }
}
