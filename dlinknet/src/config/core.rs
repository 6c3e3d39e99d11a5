//! Core configuration structure for DLinkNet.
//!
//! `DLinkNetConfig` carries every structural parameter of the network. It is a
//! Burn `Config`, so it can be saved to and loaded from JSON.

use backbones::BackboneType;
use burn::prelude::*;

use super::enums::*;
use crate::error::{DLinkNetError, DLinkNetResult};

/// Decoder widths used by LinkNet: skip-matched for the first four stages, 16 for the last.
fn default_decoder_filters() -> Vec<DecoderFilters> {
    vec![
        DecoderFilters::Auto,
        DecoderFilters::Auto,
        DecoderFilters::Auto,
        DecoderFilters::Auto,
        DecoderFilters::Fixed(16),
    ]
}

fn default_upsample_rates() -> Vec<UpsampleRate> {
    vec![UpsampleRate::Uniform(2); 5]
}

/// Structural configuration of a DLinkNet model.
///
/// The per-stage lists must cover at least `n_upsample_blocks` entries; surplus
/// entries are ignored. `skip_connection_layers` is ordered from the coarsest
/// backbone layer to the finest and may be shorter than the stage count, in
/// which case the trailing stages run without a skip.
#[derive(Config, Debug)]
pub struct DLinkNetConfig {
    /// Number of output channels of the class map.
    pub classes: usize,
    /// Backbone layers merged into the decoder stages, coarsest first.
    pub skip_connection_layers: Vec<SkipConnection>,
    /// Output width of each decoder stage.
    #[config(default = "default_decoder_filters()")]
    pub decoder_filters: Vec<DecoderFilters>,
    /// Upsampling factor of each decoder stage.
    #[config(default = "default_upsample_rates()")]
    pub upsample_rates: Vec<UpsampleRate>,
    /// Number of decoder stages.
    #[config(default = "5")]
    pub n_upsample_blocks: usize,
    /// Kernel of the spatial convolution inside each decoder stage.
    #[config(default = "[3, 3]")]
    pub upsample_kernel_size: [usize; 2],
    /// Upsampling mechanism inside each decoder stage.
    #[config(default = "UpsampleLayer::Upsampling")]
    pub upsample_layer: UpsampleLayer,
    /// Nonlinearity applied to the class map.
    #[config(default = "ActivationKind::Sigmoid")]
    pub activation: ActivationKind,
    /// Insert batch normalization after decoder convolutions.
    #[config(default = "true")]
    pub use_batchnorm: bool,
}

impl DLinkNetConfig {
    /// Configuration using the default skip layers of `backbone`.
    pub fn for_backbone(backbone: &BackboneType, classes: usize) -> Self {
        let skips = backbone
            .default_skip_connections()
            .into_iter()
            .map(SkipConnection::from)
            .collect();
        Self::new(classes, skips)
    }

    /// Check the parameters that do not depend on the backbone.
    ///
    /// # Errors
    ///
    /// Returns `Err(DLinkNetError::InvalidConfiguration)` if any validation rule is violated.
    pub fn validate(&self) -> DLinkNetResult<()> {
        let n = self.n_upsample_blocks;

        if self.classes == 0 {
            return Err(DLinkNetError::invalid("classes must be at least 1"));
        }
        if n == 0 {
            return Err(DLinkNetError::invalid("n_upsample_blocks must be at least 1"));
        }

        if self.decoder_filters.len() < n {
            return Err(DLinkNetError::invalid(format!(
                "decoder_filters has {} entries, but n_upsample_blocks is {n}",
                self.decoder_filters.len()
            )));
        }
        if self.upsample_rates.len() < n {
            return Err(DLinkNetError::invalid(format!(
                "upsample_rates has {} entries, but n_upsample_blocks is {n}",
                self.upsample_rates.len()
            )));
        }
        if self.skip_connection_layers.len() > n {
            return Err(DLinkNetError::invalid(format!(
                "skip_connection_layers has {} entries, more than the {n} decoder stages",
                self.skip_connection_layers.len()
            )));
        }

        for (stage, filters) in self.decoder_filters.iter().take(n).enumerate() {
            if *filters == DecoderFilters::Fixed(0) {
                return Err(DLinkNetError::invalid(format!(
                    "decoder_filters[{stage}] must be at least 1"
                )));
            }
        }
        for (stage, rate) in self.upsample_rates.iter().take(n).enumerate() {
            if rate.to_pair().contains(&0) {
                return Err(DLinkNetError::invalid(format!(
                    "upsample_rates[{stage}] must be positive, got {:?}",
                    rate.to_pair()
                )));
            }
        }

        // Symmetric "same" padding needs an odd kernel.
        if self.upsample_kernel_size.iter().any(|k| k % 2 == 0) {
            return Err(DLinkNetError::invalid(format!(
                "upsample_kernel_size must be odd in both dimensions, got {:?}",
                self.upsample_kernel_size
            )));
        }

        if self.decoder_filters.len() > n || self.upsample_rates.len() > n {
            tracing::warn!(
                n_upsample_blocks = n,
                decoder_filters = self.decoder_filters.len(),
                upsample_rates = self.upsample_rates.len(),
                "ignoring per-stage entries beyond n_upsample_blocks",
            );
        }

        Ok(())
    }
}
