//! DLinkNet command-line tool
//!
//! ```bash
//! cargo run --bin dlinknet -- plan --backbone resnet34 --classes 1
//! cargo run --bin dlinknet -- forward --backbone vgg16 --classes 2 --size 256 --transpose
//! cargo run --bin dlinknet -- config --backbone resnet50 --classes 1 --output dlinknet.json
//! ```

use std::{path::PathBuf, time::Instant};

use anyhow::{Context, Result};
use burn::{prelude::*, tensor::Distribution};
use clap::{Parser, Subcommand};
use dlinknet_burn::{backbones::BackboneType, DLinkNetConfig, UpsampleLayer};
use dlinknet_demos::{
    check_input_shape, create_device, init_tracing, input_divisor, render_plan, SelectedBackend,
    BACKEND_NAME,
};

#[derive(Parser)]
#[command(name = "dlinknet")]
#[command(about = "DLinkNet: LinkNet segmentation with a dilated bottleneck, built on Burn")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved decoder plan without building any layer
    Plan {
        /// Backbone name (e.g. "resnet34", "vgg16-bn")
        #[arg(short, long)]
        backbone: String,

        /// Number of output classes; taken from the file when `--config` is given
        #[arg(short, long, default_value = "1", conflicts_with = "config")]
        classes: usize,

        /// DLinkNet configuration file; overrides the backbone defaults
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Build a randomly initialized model and run one forward pass
    Forward {
        /// Backbone name (e.g. "resnet34", "vgg16-bn")
        #[arg(short, long)]
        backbone: String,

        /// Number of output classes; taken from the file when `--config` is given
        #[arg(short, long, default_value = "1", conflicts_with = "config")]
        classes: usize,

        /// Height and width of the random input, a multiple of the backbone reduction
        #[arg(short, long, default_value = "256")]
        size: usize,

        /// Batch size of the random input
        #[arg(long, default_value = "1")]
        batch: usize,

        /// Upsample with transposed convolutions instead of interpolation
        #[arg(long)]
        transpose: bool,

        /// DLinkNet configuration file; overrides the backbone defaults
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Write the default configuration for a backbone as JSON
    Config {
        /// Backbone name (e.g. "resnet34", "vgg16-bn")
        #[arg(short, long)]
        backbone: String,

        /// Number of output classes
        #[arg(short, long, default_value = "1")]
        classes: usize,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn parse_backbone(name: &str) -> Result<BackboneType> {
    name.parse()
        .with_context(|| format!("Invalid backbone: {name}"))
}

fn load_config(
    path: Option<&PathBuf>,
    backbone: &BackboneType,
    classes: usize,
) -> Result<DLinkNetConfig> {
    match path {
        Some(path) => DLinkNetConfig::load(path)
            .with_context(|| format!("Failed to load config file: {}", path.display())),
        None => Ok(DLinkNetConfig::for_backbone(backbone, classes)),
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Plan {
            backbone,
            classes,
            config,
            json,
        } => {
            let backbone = parse_backbone(&backbone)?;
            let config = load_config(config.as_ref(), &backbone, classes)?;
            let registry = backbone.layer_table();

            let plan = config
                .plan(&registry)
                .with_context(|| format!("Failed to plan DLinkNet on {backbone}"))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                println!("backbone: {backbone}");
                println!("{}", render_plan(&plan, &registry));
            }
            Ok(())
        }

        Commands::Forward {
            backbone,
            classes,
            size,
            batch,
            transpose,
            config,
        } => {
            let backbone = parse_backbone(&backbone)?;
            let mut config = load_config(config.as_ref(), &backbone, classes)?;
            if transpose {
                config.upsample_layer = UpsampleLayer::Transpose;
            }

            let registry = backbone.layer_table();
            let plan = config
                .plan(&registry)
                .with_context(|| format!("Failed to plan DLinkNet on {backbone}"))?;
            check_input_shape(batch, size, input_divisor(&plan, &registry))?;

            let device = create_device();
            tracing::info!(backend = BACKEND_NAME, %backbone, "building model");

            let model = config
                .init_with_backbone::<SelectedBackend>(backbone, &device)
                .with_context(|| format!("Failed to build DLinkNet on {backbone}"))?;
            tracing::info!(params = model.num_params(), "model ready");

            let input = Tensor::<SelectedBackend, 4>::random(
                [batch, model.input_channels(), size, size],
                Distribution::Normal(0.0, 1.0),
                &device,
            );

            let start = Instant::now();
            let output = model.forward(input);
            let dims = output.dims();
            tracing::info!(elapsed = ?start.elapsed(), "forward pass finished");

            println!("output shape: {dims:?}");
            Ok(())
        }

        Commands::Config {
            backbone,
            classes,
            output,
        } => {
            let backbone = parse_backbone(&backbone)?;
            let config = DLinkNetConfig::for_backbone(&backbone, classes);
            config.validate()?;

            config
                .save(&output)
                .with_context(|| format!("Failed to write config file: {}", output.display()))?;
            tracing::info!(path = %output.display(), "wrote configuration");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classes_conflicts_with_config_file() {
        let parsed = Cli::try_parse_from([
            "dlinknet", "plan", "--backbone", "resnet18", "--classes", "3", "--config", "a.json",
        ]);
        assert!(parsed.is_err());

        let parsed = Cli::try_parse_from([
            "dlinknet", "forward", "--backbone", "resnet18", "--config", "a.json",
        ]);
        assert!(parsed.is_ok());
    }

    #[test]
    fn test_classes_default_without_config_file() {
        let cli = Cli::try_parse_from(["dlinknet", "plan", "--backbone", "vgg16"]).unwrap();
        match cli.command {
            Commands::Plan {
                classes, config, ..
            } => {
                assert_eq!(classes, 1);
                assert!(config.is_none());
            }
            _ => panic!("Expected plan subcommand"),
        }
    }
}
