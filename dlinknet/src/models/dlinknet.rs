//! # DLinkNet Model Implementation
//!
//! `DLinkNet` chains a backbone encoder, the dilated bottleneck, a cascade of
//! LinkNet decoder blocks fed by backbone skip layers, and a segmentation head.
//!
//! ## Core Components
//!
//! - `DLinkNetConfig::init`: plans the decoder against a backbone and builds the model.
//! - `DLinkNet`: the assembled network and its forward pass.

use backbones::{create_backbone, Backbone, BackboneType, BackboneWrapper, LayerRegistry};
use burn::{module::Ignored, prelude::*};

use super::modules::{
    DecoderBlock, DecoderBlockConfig, DilatedBottleneck, DilatedBottleneckConfig,
    SegmentationHead, SegmentationHeadConfig,
};
use crate::{config::DLinkNetConfig, error::DLinkNetResult};

impl DLinkNetConfig {
    /// Initializes a `DLinkNet` model around `backbone`.
    ///
    /// # Arguments
    ///
    /// * `backbone` - The encoder; its layers are the skip connection candidates.
    /// * `device` - The device to create the decoder on.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid for this backbone or a
    /// skip connection cannot be resolved.
    pub fn init<B: Backend>(
        &self,
        backbone: BackboneWrapper<B>,
        device: &Device<B>,
    ) -> DLinkNetResult<DLinkNet<B>> {
        let plan = self.plan(&backbone)?;

        let bottleneck = DilatedBottleneckConfig::new(plan.bottleneck_channels).init(device);
        let decoder = plan
            .stages
            .iter()
            .map(|stage| {
                DecoderBlockConfig::from_plan(stage, self.upsample_layer, self.use_batchnorm)
                    .init(device)
            })
            .collect();
        let head = SegmentationHeadConfig::new(plan.decoder_channels(), self.classes)
            .with_activation(self.activation)
            .init(device);

        tracing::info!(
            input_channels = plan.input_channels,
            bottleneck_channels = plan.bottleneck_channels,
            decoder_blocks = plan.stages.len(),
            classes = plan.classes,
            upsample_layer = ?self.upsample_layer,
            activation = self.activation.name(),
            "built DLinkNet",
        );

        Ok(DLinkNet {
            backbone,
            bottleneck,
            decoder,
            skips: Ignored(plan.skip_indices()),
            head,
        })
    }

    /// Creates a freshly initialized backbone of `backbone_type` and builds the model around it.
    ///
    /// # Errors
    ///
    /// See [`DLinkNetConfig::init`].
    pub fn init_with_backbone<B: Backend>(
        &self,
        backbone_type: BackboneType,
        device: &Device<B>,
    ) -> DLinkNetResult<DLinkNet<B>> {
        self.init(create_backbone(backbone_type, device), device)
    }
}

/// The DLinkNet segmentation network.
#[derive(Module, Debug)]
pub struct DLinkNet<B: Backend> {
    backbone: BackboneWrapper<B>,
    bottleneck: DilatedBottleneck<B>,
    decoder: Vec<DecoderBlock<B>>,
    skips: Ignored<Vec<Option<usize>>>,
    head: SegmentationHead<B>,
}

impl<B: Backend> DLinkNet<B> {
    /// Runs the network on a `[batch, channels, height, width]` image batch.
    ///
    /// The class map has `classes` channels. Its spatial size is the backbone
    /// output size scaled by the product of the stage upsampling rates, so it
    /// matches the input when those rates undo the backbone's reduction.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let features = self.backbone.forward_features(input);
        let mut x = self.bottleneck.forward(features.output);

        for (block, skip) in self.decoder.iter().zip(self.skips.iter()) {
            let skip = skip.map(|idx| features.layers[idx].clone());
            x = block.forward(x, skip);
        }

        self.head.forward(x)
    }

    /// Channel count the model expects, identical to the backbone's.
    pub fn input_channels(&self) -> usize {
        self.backbone.input_channels()
    }

    pub fn num_decoder_blocks(&self) -> usize {
        self.decoder.len()
    }

    /// Backbone layer index merged at each decoder stage.
    pub fn skip_indices(&self) -> &[Option<usize>] {
        &self.skips
    }

    pub const fn backbone(&self) -> &BackboneWrapper<B> {
        &self.backbone
    }

    pub const fn bottleneck(&self) -> &DilatedBottleneck<B> {
        &self.bottleneck
    }

    pub const fn head(&self) -> &SegmentationHead<B> {
        &self.head
    }
}
