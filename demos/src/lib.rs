//! DLinkNet Demos
//!
//! Shared pieces of the `dlinknet` command-line tool: backend selection,
//! logging setup and plan rendering.
//!
//! ## Usage
//!
//! ```bash
//! # Print the decoder plan of a ResNet-34 DLinkNet
//! cargo run --bin dlinknet -- plan --backbone resnet34 --classes 1
//!
//! # Build a VGG16 model and run one random 256x256 batch through it
//! cargo run --bin dlinknet -- forward --backbone vgg16 --classes 2 --size 256
//!
//! # Write the default configuration to disk
//! cargo run --bin dlinknet -- config --backbone resnet50 --classes 1 --output dlinknet.json
//! ```

use std::fmt::Write as _;

use anyhow::{ensure, Result};
use cfg_if::cfg_if;
use dlinknet_burn::{backbones::LayerRegistry, DLinkNetPlan};
use tracing_subscriber::EnvFilter;

// One backend per build: `cuda` beats `wgpu`, `ndarray` is the fallback.
cfg_if! {
    if #[cfg(feature = "cuda")] {
        pub type SelectedBackend = burn::backend::Cuda;
        pub const BACKEND_NAME: &str = "CUDA (NVIDIA GPU)";
    } else if #[cfg(feature = "wgpu")] {
        pub type SelectedBackend = burn::backend::Wgpu;
        pub const BACKEND_NAME: &str = "WGPU (GPU)";
    } else {
        pub type SelectedBackend = burn::backend::NdArray;
        pub const BACKEND_NAME: &str = "NdArray (CPU)";
    }
}

/// Default device of [`SelectedBackend`].
pub fn create_device() -> burn::tensor::Device<SelectedBackend> {
    Default::default()
}

/// Installs the global `tracing` subscriber. `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Human-readable table of a decoder plan, one line per stage.
pub fn render_plan<R: LayerRegistry + ?Sized>(plan: &DLinkNetPlan, registry: &R) -> String {
    let layers = registry.layers();
    let mut out = String::new();

    let _ = writeln!(
        out,
        "input channels: {}, bottleneck channels: {}, classes: {}",
        plan.input_channels, plan.bottleneck_channels, plan.classes
    );
    let _ = writeln!(
        out,
        "{:>5}  {:>6}  {:>6}  {:>6}  {:>7}  skip",
        "stage", "in", "mid", "out", "rate"
    );
    for stage in &plan.stages {
        let skip = stage
            .skip
            .and_then(|idx| layers.get(idx))
            .map_or_else(|| "-".to_string(), |layer| format!("{} (/{})", layer.name, layer.reduction));
        let _ = writeln!(
            out,
            "{:>5}  {:>6}  {:>6}  {:>6}  {:>7}  {skip}",
            stage.stage,
            stage.in_channels,
            stage.mid_channels,
            stage.out_channels,
            format!("{}x{}", stage.upsample_rate[0], stage.upsample_rate[1]),
        );
    }
    let [h, w] = plan.total_upsampling();
    let _ = write!(out, "total upsampling: {h}x{w}");

    out
}

/// Smallest input side that every merged feature map divides exactly.
///
/// Skip tensors are added to upsampled decoder maps, so the input must divide
/// by the backbone output reduction and by every skip layer's reduction.
pub fn input_divisor<R: LayerRegistry + ?Sized>(plan: &DLinkNetPlan, registry: &R) -> usize {
    let layers = registry.layers();
    plan.stages
        .iter()
        .filter_map(|stage| stage.skip.and_then(|idx| layers.get(idx)))
        .map(|layer| layer.reduction)
        .fold(registry.output().reduction.max(1), lcm)
}

const fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

const fn lcm(a: usize, b: usize) -> usize {
    a / gcd(a, b) * b
}

/// Rejects random-input shapes the model cannot run on.
///
/// # Errors
///
/// Fails when `batch` is zero, or `size` is zero or not a multiple of `divisor`.
pub fn check_input_shape(batch: usize, size: usize, divisor: usize) -> Result<()> {
    ensure!(batch >= 1, "--batch must be at least 1");
    ensure!(
        size >= divisor && size % divisor == 0,
        "--size must be a positive multiple of {divisor}, got {size}"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlinknet_burn::{backbones::BackboneType, DLinkNetConfig};

    #[test]
    fn test_render_plan_lists_every_stage() {
        let backbone: BackboneType = "resnet18".parse().unwrap();
        let registry = backbone.layer_table();
        let plan = DLinkNetConfig::for_backbone(&backbone, 1)
            .plan(&registry)
            .unwrap();

        let text = render_plan(&plan, &registry);

        assert_eq!(text.lines().count(), 2 + plan.stages.len() + 1);
        assert!(text.contains("layer3 (/16)"));
        assert!(text.contains("stem (/2)"));
        assert!(text.ends_with("total upsampling: 32x32"));
    }

    #[test]
    fn test_input_divisor_follows_backbone_reduction() {
        for name in ["resnet18", "vgg16"] {
            let backbone: BackboneType = name.parse().unwrap();
            let registry = backbone.layer_table();
            let plan = DLinkNetConfig::for_backbone(&backbone, 1)
                .plan(&registry)
                .unwrap();

            assert_eq!(input_divisor(&plan, &registry), 32, "{name}");
        }
    }

    #[test]
    fn test_check_input_shape() {
        assert!(check_input_shape(1, 64, 32).is_ok());
        assert!(check_input_shape(4, 256, 32).is_ok());

        // 100 is not a multiple of 32, so a skip addition would fail mid-forward.
        let err = check_input_shape(1, 100, 32).unwrap_err();
        assert!(err.to_string().contains("multiple of 32"));

        assert!(check_input_shape(1, 0, 32).is_err());
        assert!(check_input_shape(1, 16, 32).is_err());
        assert!(check_input_shape(0, 64, 32).is_err());
    }
}
