use backbones::BackboneError;
use thiserror::Error;

/// The error type for `DLinkNet-Burn` operations.
///
/// Every variant is raised while building a model; a model that was built
/// successfully has no failure modes of its own.
#[derive(Error, Debug)]
pub enum DLinkNetError {
    /// A backbone-level failure, such as a skip layer name that matches zero or
    /// several layers. Passed through unchanged.
    #[error(transparent)]
    Backbone(#[from] BackboneError),

    /// Error for when an invalid model configuration is provided.
    /// This can happen if configuration parameters are logically inconsistent.
    #[error("Invalid model configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },

    /// Error for when an upsampling strategy name is not recognized.
    #[error("Unsupported upsample layer: {name}")]
    UnsupportedUpsampleLayer {
        /// The unrecognized name.
        name: String,
    },

    /// Error for when an activation name is not recognized.
    #[error("Unsupported activation: {name}")]
    UnsupportedActivation {
        /// The unrecognized name.
        name: String,
    },
}

impl DLinkNetError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }
}

/// A specialized `Result` type for `DLinkNet-Burn` operations.
pub type DLinkNetResult<T> = Result<T, DLinkNetError>;
