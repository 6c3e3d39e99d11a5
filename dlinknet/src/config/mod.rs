//! Configuration module for DLinkNet.
//!
//! This module provides configuration structures and enums for the DLinkNet model.
//! It is organized into two submodules:
//! - `core`: Contains the main configuration structure
//! - `enums`: Contains all enumeration types used in configurations

pub mod core;
pub mod enums;

pub use self::core::DLinkNetConfig;

pub use enums::{ActivationKind, DecoderFilters, SkipConnection, UpsampleLayer, UpsampleRate};
