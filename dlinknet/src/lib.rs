//! # DLinkNet-Burn
//!
//! This crate provides a Rust implementation of DLinkNet, a LinkNet-style
//! semantic segmentation network with a dilated-convolution bottleneck, built
//! using the Burn deep learning framework.
//!
//! ## Modules
//!
//! - `config`: The configuration structure and its enums. Configurations are
//!   Burn `Config`s and round-trip through JSON.
//! - `error`: Defines the custom error types used throughout the crate.
//! - `models`: The dilated bottleneck, decoder blocks, segmentation head and
//!   the assembled `DLinkNet` model.
//! - `plan`: Resolves skip connections and stage widths against a backbone
//!   without building any layer.
//!
//! ## Key Components
//!
//! - `DLinkNet`: The main model struct.
//! - `DLinkNetConfig`: The configuration that drives the model's construction.
//! - `DLinkNetPlan`: The resolved shape of every decoder stage.
//! - `DLinkNetError`: The enum for all possible errors.

mod config;
mod error;
mod models;
mod plan;

#[doc(inline)]
pub use config::{
    ActivationKind, DLinkNetConfig, DecoderFilters, SkipConnection, UpsampleLayer, UpsampleRate,
};
#[doc(inline)]
pub use error::{DLinkNetError, DLinkNetResult};
#[doc(inline)]
pub use models::dlinknet::{DLinkNet, DLinkNetRecord};
#[doc(inline)]
pub use models::modules::{
    DecoderBlock, DecoderBlockConfig, DilatedBottleneck, DilatedBottleneckConfig,
    SegmentationHead, SegmentationHeadConfig, DILATION_RATES,
};
#[doc(inline)]
pub use plan::{resolve_skip_connections, DLinkNetPlan, DecoderStagePlan, DECODER_SQUEEZE};

pub use backbones;
