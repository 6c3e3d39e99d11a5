//! Build-time planning of the decoder cascade.
//!
//! Planning resolves skip references against a backbone's layer registry and
//! fixes the channel widths of every decoder stage before any weights are
//! allocated, so every configuration error surfaces here rather than deep in
//! module construction.

use backbones::{LayerInfo, LayerRegistry};
use serde::Serialize;

use crate::{
    config::{DecoderFilters, DLinkNetConfig, SkipConnection},
    error::{DLinkNetError, DLinkNetResult},
};

/// Channel squeeze applied by the first 1x1 convolution of every decoder stage.
pub const DECODER_SQUEEZE: usize = 4;

/// Resolve skip references into positions of `registry.layers()`.
///
/// Indices pass through unchanged; names go through
/// [`LayerRegistry::layer_index`], whose lookup error is returned as-is.
///
/// # Errors
///
/// Returns `Err(DLinkNetError::Backbone)` if a name matches zero or several layers.
pub fn resolve_skip_connections<R>(
    skips: &[SkipConnection],
    registry: &R,
) -> DLinkNetResult<Vec<usize>>
where
    R: LayerRegistry + ?Sized,
{
    skips
        .iter()
        .map(|skip| match skip {
            SkipConnection::Index(idx) => Ok(*idx),
            SkipConnection::Name(name) => Ok(registry.layer_index(name)?),
        })
        .collect()
}

/// Shape of one decoder stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecoderStagePlan {
    /// Position in the cascade, 0 being the stage right after the bottleneck.
    pub stage: usize,
    pub in_channels: usize,
    /// Width after the 1x1 squeeze and through the upsampling convolution.
    pub mid_channels: usize,
    pub out_channels: usize,
    pub kernel_size: [usize; 2],
    /// `[height, width]` upsampling factor.
    pub upsample_rate: [usize; 2],
    /// Backbone layer added to the stage output.
    pub skip: Option<usize>,
}

/// Fully resolved network shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DLinkNetPlan {
    pub input_channels: usize,
    /// Channels of the backbone output, preserved by the dilated bottleneck.
    pub bottleneck_channels: usize,
    pub stages: Vec<DecoderStagePlan>,
    pub classes: usize,
}

impl DLinkNetPlan {
    /// Resolved skip index of every stage, `None` where the stage has no skip.
    pub fn skip_indices(&self) -> Vec<Option<usize>> {
        self.stages.iter().map(|stage| stage.skip).collect()
    }

    /// Cumulative `[height, width]` upsampling of the decoder cascade.
    pub fn total_upsampling(&self) -> [usize; 2] {
        self.stages.iter().fold([1, 1], |[h, w], stage| {
            [h * stage.upsample_rate[0], w * stage.upsample_rate[1]]
        })
    }

    /// Channels entering the classifier head.
    pub fn decoder_channels(&self) -> usize {
        self.stages
            .last()
            .map_or(self.bottleneck_channels, |stage| stage.out_channels)
    }
}

impl DLinkNetConfig {
    /// Validate this configuration against `registry` and resolve the shape of every stage.
    ///
    /// # Errors
    ///
    /// Returns `Err(DLinkNetError::InvalidConfiguration)` if list lengths, skip indices or
    /// channel widths are inconsistent, and `Err(DLinkNetError::Backbone)` if a skip name
    /// cannot be resolved.
    pub fn plan<R>(&self, registry: &R) -> DLinkNetResult<DLinkNetPlan>
    where
        R: LayerRegistry + ?Sized,
    {
        self.validate()?;

        let layers = registry.layers();
        let skip_idx = resolve_skip_connections(&self.skip_connection_layers, registry)?;
        let skip_layers = skip_idx
            .iter()
            .map(|&idx| {
                layers.get(idx).ok_or_else(|| {
                    DLinkNetError::invalid(format!(
                        "skip connection index {idx} is out of range for a backbone with {} layers",
                        layers.len()
                    ))
                })
            })
            .collect::<DLinkNetResult<Vec<&LayerInfo>>>()?;

        warn_if_unordered(&skip_layers);

        let bottleneck_channels = registry.output().channels;
        let mut in_channels = bottleneck_channels;
        let mut stages = Vec::with_capacity(self.n_upsample_blocks);

        for stage in 0..self.n_upsample_blocks {
            let skip = skip_layers.get(stage).copied();

            let mid_channels = in_channels / DECODER_SQUEEZE;
            if mid_channels == 0 {
                return Err(DLinkNetError::invalid(format!(
                    "decoder stage {stage} receives {in_channels} channels, \
                     at least {DECODER_SQUEEZE} are required"
                )));
            }

            let out_channels = match (&self.decoder_filters[stage], skip) {
                (DecoderFilters::Auto, Some(layer)) => layer.channels,
                (DecoderFilters::Auto, None) => {
                    return Err(DLinkNetError::invalid(format!(
                        "decoder_filters[{stage}] is Auto but stage {stage} has no skip connection"
                    )));
                }
                (DecoderFilters::Fixed(filters), Some(layer)) if *filters != layer.channels => {
                    return Err(DLinkNetError::invalid(format!(
                        "decoder_filters[{stage}] is {filters} but skip layer `{}` has {} channels",
                        layer.name, layer.channels
                    )));
                }
                (DecoderFilters::Fixed(filters), _) => *filters,
            };

            let plan = DecoderStagePlan {
                stage,
                in_channels,
                mid_channels,
                out_channels,
                kernel_size: self.upsample_kernel_size,
                upsample_rate: self.upsample_rates[stage].to_pair(),
                skip: skip_idx.get(stage).copied(),
            };
            tracing::debug!(?plan, "planned decoder stage");

            in_channels = out_channels;
            stages.push(plan);
        }

        Ok(DLinkNetPlan {
            input_channels: registry.input_channels(),
            bottleneck_channels,
            stages,
            classes: self.classes,
        })
    }
}

/// Skip order is the caller's contract; a layer finer than its successor is only reported.
fn warn_if_unordered(skip_layers: &[&LayerInfo]) {
    for pair in skip_layers.windows(2) {
        if pair[1].reduction > pair[0].reduction {
            tracing::warn!(
                earlier = %pair[0].name,
                later = %pair[1].name,
                "skip connections are not ordered from coarsest to finest",
            );
        }
    }
}
