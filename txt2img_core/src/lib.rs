//! Core crate for one-shot text-to-image generation.
//!
//! Everything heavy (model weights, sampling, kernels) lives in `diffusion_rs_core`. This crate
//! loads a pipeline, binds it to a device, runs it once and writes the first image to disk.
//!
//! ```rust,no_run
//! use txt2img_core::{generate, DiffusionRsRuntime, GenerationConfig};
//!
//! let config = GenerationConfig {
//!     prompt: "Draw a picture of a sunrise.".to_string(),
//!     output: "sunrise.png".into(),
//!     ..Default::default()
//! };
//!
//! let report = generate(&DiffusionRsRuntime::default(), &config)?;
//! println!("Took: {:.2}s", report.generation_time.as_secs_f32());
//!
//! # Ok::<(), anyhow::Error>(())
//! ```

mod config;
mod device;
mod diffusion;
mod error;
mod model;
mod output;
mod runtime;
mod shell;

pub use config::{ConfigError, GenerationConfig, Precision, SamplingParams};
pub use device::{DeviceSpec, ParseDeviceError};
pub use diffusion::{DiffusionRsPipeline, DiffusionRsRuntime, Offloading};
pub use error::{BoxError, GenerateError, OutputError, Stage};
pub use model::ModelRef;
pub use runtime::{GeneratedImages, ImagePipeline, PipelineRuntime};
pub use shell::{generate, GenerationReport};
