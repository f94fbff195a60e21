//! Command line interface.

use clap::{Parser, ValueEnum};
use log::LevelFilter;

use crate::model::LossKind;

/// Custom enum for log levels that can be used with clap's ValueEnum
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    /// Errors only
    Error,
    /// Errors and warnings
    Warn,
    /// Stage progress and timings
    Info,
    /// Per-step diagnostics
    Debug,
    /// Everything
    Trace,
}

/// Convert our custom LogLevel enum to log crate's LevelFilter
impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// Training loss selectable from the command line
#[derive(Debug, Clone, ValueEnum)]
pub enum LossArg {
    /// Mean squared error over all label channels
    Mse,
    /// Cross-entropy on visibility, MSE on position and normal
    Visibility,
}

impl From<LossArg> for LossKind {
    fn from(loss: LossArg) -> Self {
        match loss {
            LossArg::Mse => LossKind::MeanSquared,
            LossArg::Visibility => LossKind::VisibilityCrossEntropy,
        }
    }
}

/// Command line arguments structure using clap derive macros
#[derive(Parser)]
#[command(name = "neuracast")]
#[command(about = "Reference and neural-surrogate renders of a glTF scene")]
pub struct Args {
    /// glTF scene file to render
    pub scene: String,

    /// Set the logging level (defaults to "info")
    #[arg(long, default_value = "info", help = "Set the logging level")]
    pub debug_level: LogLevel,

    /// Image width in pixels
    #[arg(long, default_value = "1000", help = "Image width in pixels")]
    pub width: u32,

    /// Image height in pixels
    #[arg(long, default_value = "1000", help = "Image height in pixels")]
    pub height: u32,

    /// Number of along-ray sample positions fed to the model per ray
    #[arg(long, short = 's', default_value = "32", help = "Model samples per ray")]
    pub samples_per_ray: usize,

    /// Fractional margin added to the scene bounds before sampling
    #[arg(long, default_value = "0.2", help = "Scene bounds expansion margin")]
    pub bounds_margin: f32,

    /// Number of sample points for dataset synthesis
    #[arg(long, default_value = "20000", help = "Dataset synthesis points")]
    pub points: usize,

    /// Chained rays generated per sample point
    #[arg(long, default_value = "4", help = "Rays per dataset point")]
    pub rays_per_point: usize,

    /// Optimization steps for surrogate training
    #[arg(long, default_value = "2000", help = "Training iterations")]
    pub train_iterations: usize,

    /// Rows per training minibatch
    #[arg(long, default_value = "1024", help = "Training batch size")]
    pub batch_size: usize,

    /// Adam learning rate
    #[arg(long, default_value = "0.002", help = "Adam learning rate")]
    pub learning_rate: f32,

    /// Training loss
    #[arg(long, value_enum, default_value = "mse", help = "Training loss")]
    pub loss: LossArg,

    /// Hidden layer width of the surrogate network
    #[arg(long, default_value = "64", help = "Hidden layer width")]
    pub hidden_width: usize,

    /// Hidden layer count of the surrogate network
    #[arg(long, default_value = "3", help = "Hidden layer count")]
    pub hidden_layers: usize,

    /// Frequency-encoding octaves per input component (0 disables)
    #[arg(long, default_value = "4", help = "Input encoding octaves")]
    pub frequencies: usize,

    /// Seed for dataset synthesis and weight initialization
    #[arg(long, default_value = "42", help = "Random seed")]
    pub seed: u64,

    /// Skip all queries and shade by |ray direction| to measure
    /// ray-generation overhead
    #[arg(long, help = "Measure ray-generation overhead only")]
    pub measure_overhead: bool,

    /// Send rendered images to TEV for real-time visualization
    #[arg(long, help = "Send images to TEV for real-time visualization")]
    pub tev: bool,

    /// TEV client IP address and port (automatically enables --tev)
    #[arg(long, help = "TEV client IP address and port (automatically enables --tev)")]
    pub tev_address: Option<String>,

    /// Output file prefix (writes <prefix>_reference.png, <prefix>_depth.exr,
    /// <prefix>_surrogate.png, <prefix>_surrogate_depth.exr)
    #[arg(short, long, default_value = "out", help = "Output file prefix")]
    pub output: String,
}
