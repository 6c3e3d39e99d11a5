//! Backbone implementations for DLinkNet
//!
//! This crate provides a unified interface over the feature extractors DLinkNet can be
//! built on. A backbone exposes its input width, an ordered list of named intermediate
//! layers (the skip-connection candidates) and one final feature map.

use core::fmt;
use core::str::FromStr;

use burn::prelude::*;
use thiserror::Error;

pub use resnet::{
    ResNetBackbone, ResNetConfig, RESNET_INPUT_CHANNELS, RESNET_LAYER_NAMES,
    RESNET_LAYER_REDUCTIONS,
};
pub use vgg::{
    VGGBackbone, VggConfig, VGG16_LAYER_CHANNELS, VGG_INPUT_CHANNELS, VGG_LAYER_NAMES,
    VGG_LAYER_REDUCTIONS,
};

/// Errors raised by backbone construction and layer lookup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackboneError {
    /// No layer carries the requested name.
    #[error("No layer named `{name}` in backbone")]
    LayerNotFound {
        /// The requested layer name.
        name: String,
    },

    /// More than one layer carries the requested name.
    #[error("Layer name `{name}` is ambiguous: {matches} layers match")]
    AmbiguousLayer {
        /// The requested layer name.
        name: String,
        /// How many layers matched.
        matches: usize,
    },

    /// The backbone name is not one of the supported variants.
    #[error("Unknown backbone: {name}")]
    UnknownBackbone {
        /// The unrecognized name.
        name: String,
    },
}

/// Static description of one named backbone layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerInfo {
    /// Layer name, used by name-based skip connections.
    pub name: String,
    /// Number of output channels.
    pub channels: usize,
    /// Cumulative spatial stride relative to the backbone input.
    pub reduction: usize,
}

impl LayerInfo {
    pub fn new(name: impl Into<String>, channels: usize, reduction: usize) -> Self {
        Self {
            name: name.into(),
            channels,
            reduction,
        }
    }
}

/// Build-time view of a backbone: what it consumes, which layers it exposes, what it produces.
pub trait LayerRegistry {
    /// Channels of the backbone input tensor.
    fn input_channels(&self) -> usize;

    /// Named layers in forward order.
    fn layers(&self) -> Vec<LayerInfo>;

    /// The final feature map.
    fn output(&self) -> LayerInfo;

    /// Position of the unique layer called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`BackboneError::LayerNotFound`] when no layer matches and
    /// [`BackboneError::AmbiguousLayer`] when several do.
    fn layer_index(&self, name: &str) -> Result<usize, BackboneError> {
        let matches: Vec<usize> = self
            .layers()
            .iter()
            .enumerate()
            .filter(|(_, layer)| layer.name == name)
            .map(|(idx, _)| idx)
            .collect();

        match matches.as_slice() {
            [idx] => Ok(*idx),
            [] => Err(BackboneError::LayerNotFound {
                name: name.to_string(),
            }),
            _ => Err(BackboneError::AmbiguousLayer {
                name: name.to_string(),
                matches: matches.len(),
            }),
        }
    }
}

/// Plain layer description, for backbones described by hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerTable {
    pub input_channels: usize,
    pub layers: Vec<LayerInfo>,
    pub output: LayerInfo,
}

impl LayerRegistry for LayerTable {
    fn input_channels(&self) -> usize {
        self.input_channels
    }

    fn layers(&self) -> Vec<LayerInfo> {
        self.layers.clone()
    }

    fn output(&self) -> LayerInfo {
        self.output.clone()
    }
}

/// Tensors produced by one backbone forward pass.
#[derive(Debug, Clone)]
pub struct BackboneFeatures<B: Backend> {
    /// One tensor per entry of [`LayerRegistry::layers`], same order.
    pub layers: Vec<Tensor<B, 4>>,
    /// The final feature map.
    pub output: Tensor<B, 4>,
}

/// Unified backbone trait for DLinkNet
pub trait Backbone<B: Backend>: LayerRegistry {
    /// Forward pass through the backbone
    ///
    /// # Arguments
    /// * `input` - Input tensor of shape `[batch_size, channels, height, width]`
    fn forward_features(&self, input: Tensor<B, 4>) -> BackboneFeatures<B>;
}

impl<B: Backend> LayerRegistry for ResNetBackbone<B> {
    fn input_channels(&self) -> usize {
        RESNET_INPUT_CHANNELS
    }

    fn layers(&self) -> Vec<LayerInfo> {
        RESNET_LAYER_NAMES
            .iter()
            .zip(self.layer_channels())
            .zip(RESNET_LAYER_REDUCTIONS)
            .map(|((name, channels), reduction)| LayerInfo::new(*name, channels, reduction))
            .collect()
    }

    fn output(&self) -> LayerInfo {
        LayerInfo::new("layer4", self.layer_channels()[5], 32)
    }
}

impl<B: Backend> Backbone<B> for ResNetBackbone<B> {
    fn forward_features(&self, input: Tensor<B, 4>) -> BackboneFeatures<B> {
        let layers = Vec::from(self.forward(input));
        let output = layers[layers.len() - 1].clone();
        BackboneFeatures { layers, output }
    }
}

impl<B: Backend> LayerRegistry for VGGBackbone<B> {
    fn input_channels(&self) -> usize {
        VGG_INPUT_CHANNELS
    }

    fn layers(&self) -> Vec<LayerInfo> {
        VGG_LAYER_NAMES
            .iter()
            .zip(VGG16_LAYER_CHANNELS)
            .zip(VGG_LAYER_REDUCTIONS)
            .map(|((name, channels), reduction)| LayerInfo::new(*name, channels, reduction))
            .collect()
    }

    fn output(&self) -> LayerInfo {
        LayerInfo::new("block5", VGG16_LAYER_CHANNELS[4], 32)
    }
}

impl<B: Backend> Backbone<B> for VGGBackbone<B> {
    fn forward_features(&self, input: Tensor<B, 4>) -> BackboneFeatures<B> {
        let layers = self.forward(input);
        let output = layers[layers.len() - 1].clone();
        BackboneFeatures { layers, output }
    }
}

/// Enumeration of supported backbone types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackboneType {
    /// ResNet backbone
    ResNet(ResNetVariant),
    /// VGG backbone
    VGG(VGGVariant),
}

/// ResNet variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResNetVariant {
    /// ResNet-18
    ResNet18,
    /// ResNet-34
    ResNet34,
    /// ResNet-50
    ResNet50,
    /// ResNet-101
    ResNet101,
    /// ResNet-152
    ResNet152,
}

/// VGG variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VGGVariant {
    /// VGG-16
    VGG16,
    /// VGG-16 with batch normalization
    VGG16BN,
}

impl BackboneType {
    /// Skip layers DLinkNet taps on this backbone, coarsest first.
    pub fn default_skip_connections(&self) -> Vec<&'static str> {
        match self {
            Self::ResNet(_) => vec!["layer3", "layer2", "layer1", "stem"],
            Self::VGG(_) => vec!["block4", "block3", "block2", "block1"],
        }
    }

    /// The layer registry of this backbone, without allocating any weights.
    pub fn layer_table(&self) -> LayerTable {
        let (input_channels, names, channels, reductions): (usize, &[&str], Vec<usize>, &[usize]) =
            match self {
                Self::ResNet(variant) => {
                    let e = match variant {
                        ResNetVariant::ResNet18 | ResNetVariant::ResNet34 => 1,
                        _ => 4,
                    };
                    (
                        RESNET_INPUT_CHANNELS,
                        &RESNET_LAYER_NAMES,
                        vec![64, 64, 64 * e, 128 * e, 256 * e, 512 * e],
                        &RESNET_LAYER_REDUCTIONS,
                    )
                }
                Self::VGG(_) => (
                    VGG_INPUT_CHANNELS,
                    &VGG_LAYER_NAMES,
                    VGG16_LAYER_CHANNELS.to_vec(),
                    &VGG_LAYER_REDUCTIONS,
                ),
            };

        let layers: Vec<LayerInfo> = names
            .iter()
            .zip(channels)
            .zip(reductions)
            .map(|((name, channels), reduction)| LayerInfo::new(*name, channels, *reduction))
            .collect();
        let output = layers[layers.len() - 1].clone();

        LayerTable {
            input_channels,
            layers,
            output,
        }
    }
}

impl FromStr for BackboneType {
    type Err = BackboneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let backbone = match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "resnet18" => Self::ResNet(ResNetVariant::ResNet18),
            "resnet34" => Self::ResNet(ResNetVariant::ResNet34),
            "resnet50" => Self::ResNet(ResNetVariant::ResNet50),
            "resnet101" => Self::ResNet(ResNetVariant::ResNet101),
            "resnet152" => Self::ResNet(ResNetVariant::ResNet152),
            "vgg16" => Self::VGG(VGGVariant::VGG16),
            "vgg16bn" => Self::VGG(VGGVariant::VGG16BN),
            _ => {
                return Err(BackboneError::UnknownBackbone {
                    name: s.to_string(),
                })
            }
        };
        Ok(backbone)
    }
}

impl fmt::Display for BackboneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ResNet(ResNetVariant::ResNet18) => "resnet18",
            Self::ResNet(ResNetVariant::ResNet34) => "resnet34",
            Self::ResNet(ResNetVariant::ResNet50) => "resnet50",
            Self::ResNet(ResNetVariant::ResNet101) => "resnet101",
            Self::ResNet(ResNetVariant::ResNet152) => "resnet152",
            Self::VGG(VGGVariant::VGG16) => "vgg16",
            Self::VGG(VGGVariant::VGG16BN) => "vgg16bn",
        };
        f.write_str(name)
    }
}

/// Enum to wrap different backbone implementations
#[derive(Module, Debug)]
pub enum BackboneWrapper<B: Backend> {
    /// ResNet backbone
    ResNet(ResNetBackbone<B>),
    /// VGG backbone
    VGG(VGGBackbone<B>),
}

impl<B: Backend> LayerRegistry for BackboneWrapper<B> {
    fn input_channels(&self) -> usize {
        match self {
            Self::ResNet(backbone) => backbone.input_channels(),
            Self::VGG(backbone) => backbone.input_channels(),
        }
    }

    fn layers(&self) -> Vec<LayerInfo> {
        match self {
            Self::ResNet(backbone) => backbone.layers(),
            Self::VGG(backbone) => backbone.layers(),
        }
    }

    fn output(&self) -> LayerInfo {
        match self {
            Self::ResNet(backbone) => backbone.output(),
            Self::VGG(backbone) => backbone.output(),
        }
    }
}

impl<B: Backend> Backbone<B> for BackboneWrapper<B> {
    fn forward_features(&self, input: Tensor<B, 4>) -> BackboneFeatures<B> {
        match self {
            Self::ResNet(backbone) => backbone.forward_features(input),
            Self::VGG(backbone) => backbone.forward_features(input),
        }
    }
}

/// Factory function to create backbones
pub fn create_backbone<B: Backend>(
    backbone_type: BackboneType,
    device: &Device<B>,
) -> BackboneWrapper<B> {
    match backbone_type {
        BackboneType::ResNet(variant) => {
            let config = match variant {
                ResNetVariant::ResNet18 => ResNetConfig::resnet18(),
                ResNetVariant::ResNet34 => ResNetConfig::resnet34(),
                ResNetVariant::ResNet50 => ResNetConfig::resnet50(),
                ResNetVariant::ResNet101 => ResNetConfig::resnet101(),
                ResNetVariant::ResNet152 => ResNetConfig::resnet152(),
            };
            BackboneWrapper::ResNet(config.init(device))
        }
        BackboneType::VGG(variant) => {
            let config = match variant {
                VGGVariant::VGG16 => VggConfig::vgg16(),
                VGGVariant::VGG16BN => VggConfig::vgg16_bn(),
            };
            BackboneWrapper::VGG(config.init(device))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn table(names: &[&str]) -> LayerTable {
        LayerTable {
            input_channels: 3,
            layers: names
                .iter()
                .enumerate()
                .map(|(i, name)| LayerInfo::new(*name, 8 << i, 2 << i))
                .collect(),
            output: LayerInfo::new("out", 64, 32),
        }
    }

    #[test]
    fn test_layer_index_unique_match() {
        let registry = table(&["a", "b", "c"]);
        assert_eq!(registry.layer_index("b"), Ok(1));
    }

    #[test]
    fn test_layer_index_missing() {
        let registry = table(&["a", "b"]);
        assert_eq!(
            registry.layer_index("z"),
            Err(BackboneError::LayerNotFound {
                name: "z".to_string()
            })
        );
    }

    #[test]
    fn test_layer_index_ambiguous() {
        let registry = table(&["a", "relu", "relu"]);
        assert_eq!(
            registry.layer_index("relu"),
            Err(BackboneError::AmbiguousLayer {
                name: "relu".to_string(),
                matches: 2
            })
        );
    }

    #[test]
    fn test_backbone_type_parsing() {
        assert_eq!(
            "ResNet-34".parse::<BackboneType>(),
            Ok(BackboneType::ResNet(ResNetVariant::ResNet34))
        );
        assert_eq!(
            "vgg16_bn".parse::<BackboneType>(),
            Ok(BackboneType::VGG(VGGVariant::VGG16BN))
        );
        assert!("mobilenet".parse::<BackboneType>().is_err());
        assert_eq!(
            BackboneType::ResNet(ResNetVariant::ResNet101).to_string(),
            "resnet101"
        );
    }

    #[test]
    fn test_default_skips_resolve_on_every_family() {
        let device = Default::default();
        for backbone_type in [
            BackboneType::ResNet(ResNetVariant::ResNet18),
            BackboneType::VGG(VGGVariant::VGG16),
        ] {
            let backbone = create_backbone::<TestBackend>(backbone_type, &device);
            for name in backbone_type.default_skip_connections() {
                assert!(backbone.layer_index(name).is_ok(), "{name} on {backbone_type}");
            }
        }
    }

    #[test]
    fn test_layer_table_matches_built_backbone() {
        let device = Default::default();
        for backbone_type in [
            BackboneType::ResNet(ResNetVariant::ResNet18),
            BackboneType::ResNet(ResNetVariant::ResNet50),
            BackboneType::VGG(VGGVariant::VGG16BN),
        ] {
            let table = backbone_type.layer_table();
            let backbone = create_backbone::<TestBackend>(backbone_type, &device);

            assert_eq!(table.input_channels(), backbone.input_channels());
            assert_eq!(table.layers(), backbone.layers());
            assert_eq!(table.output(), backbone.output());
        }
    }

    #[test]
    fn test_resnet_backbone_features() {
        let device = Default::default();
        let backbone = create_backbone(BackboneType::ResNet(ResNetVariant::ResNet18), &device);

        let input = Tensor::<TestBackend, 4>::random(
            [1, 3, 64, 64],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );

        let features = backbone.forward_features(input);
        let layers = backbone.layers();

        assert_eq!(features.layers.len(), layers.len());
        for (tensor, info) in features.layers.iter().zip(&layers) {
            assert_eq!(
                tensor.dims(),
                [1, info.channels, 64 / info.reduction, 64 / info.reduction]
            );
        }
        assert_eq!(features.output.dims(), [1, backbone.output().channels, 2, 2]);
    }

    #[test]
    fn test_vgg_backbone_features() {
        let device = Default::default();
        let backbone = create_backbone(BackboneType::VGG(VGGVariant::VGG16), &device);

        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 32, 32], &device);
        let features = backbone.forward_features(input);

        assert_eq!(backbone.input_channels(), 3);
        assert_eq!(backbone.output().channels, 512);
        assert_eq!(features.layers.len(), 5);
        assert_eq!(features.output.dims(), [1, 512, 1, 1]);
    }
}
