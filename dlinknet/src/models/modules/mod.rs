pub mod bottleneck;
pub mod decoder_blocks;
pub mod head;

pub use bottleneck::{DilatedBottleneck, DilatedBottleneckConfig, DILATION_RATES};
pub use decoder_blocks::{DecoderBlock, DecoderBlockConfig};
pub use head::{SegmentationHead, SegmentationHeadConfig};
