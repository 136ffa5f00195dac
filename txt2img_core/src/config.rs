use std::{
    fmt::Display,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use image::ImageFormat;
use serde::Deserialize;
use thiserror::Error;

use crate::{DeviceSpec, ModelRef};

pub(crate) const DEFAULT_MODEL_ID: &str = "black-forest-labs/FLUX.1-schnell";
pub(crate) const DEFAULT_PROMPT: &str = "Dhoni hitting a six";
pub(crate) const DEFAULT_OUTPUT: &str = "output.png";

/// Encoders that accept 8-bit RGB. Float-only formats such as OpenEXR and Radiance HDR are left out.
const RGB8_FORMATS: &[ImageFormat] = &[
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::Bmp,
    ImageFormat::Tiff,
    ImageFormat::WebP,
    ImageFormat::Tga,
    ImageFormat::Pnm,
    ImageFormat::Qoi,
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("prompt must not be empty")]
    EmptyPrompt,
    #[error("model identifier must not be empty")]
    EmptyModel,
    #[error("cannot infer a writable image format from `{}`", path.display())]
    UnsupportedOutput { path: PathBuf },
    #[error("`{0}` must be non-zero")]
    Zero(&'static str),
    #[error("could not read config file `{}`", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config file `{}`", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Copy, Default, Debug, Deserialize, PartialEq, Eq, clap::ValueEnum)]
/// Numeric precision for the model weights.
///
/// Note: When using `Auto`, the runtime falls back BF16 -> F16 -> F32
pub enum Precision {
    #[default]
    #[serde(rename = "auto")]
    #[value(name = "auto")]
    Auto,
    #[serde(rename = "bf16")]
    #[value(name = "bf16")]
    BF16,
    #[serde(rename = "f16")]
    #[value(name = "f16")]
    F16,
    #[serde(rename = "f32")]
    #[value(name = "f32")]
    F32,
}

impl Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::BF16 => write!(f, "bf16"),
            Self::F16 => write!(f, "f16"),
            Self::F32 => write!(f, "f32"),
        }
    }
}

/// Sampling parameters handed to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SamplingParams {
    pub height: usize,
    pub width: usize,
    /// The number of denoising steps. More denoising steps usually lead to a higher quality image at the
    /// expense of slower inference but depends on the model being used.
    pub num_steps: usize,
    /// Higher guidance scale encourages to generate images that are closely linked to the text `prompt`,
    /// usually at the expense of lower image quality.
    pub guidance_scale: f64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            height: 1024,
            width: 1024,
            num_steps: 4,
            guidance_scale: 0.0,
        }
    }
}

/// Everything one generation needs. Fields missing from a config file keep their defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationConfig {
    /// Hugging Face model ID, or a path ending in `.dduf`.
    pub model: String,
    /// Hub revision. Ignored for DDUF files.
    pub revision: Option<String>,
    pub precision: Precision,
    pub device: DeviceSpec,
    pub prompt: String,
    /// Destination file. The extension selects the encoder.
    pub output: PathBuf,
    pub sampling: SamplingParams,
    /// Abandon generation after this many seconds.
    pub timeout_secs: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL_ID.to_string(),
            revision: None,
            precision: Precision::default(),
            device: DeviceSpec::default(),
            prompt: DEFAULT_PROMPT.to_string(),
            output: PathBuf::from(DEFAULT_OUTPUT),
            sampling: SamplingParams::default(),
            timeout_secs: None,
        }
    }
}

impl GenerationConfig {
    /// Read a JSON config file. Any field may be omitted.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn model_ref(&self) -> Result<ModelRef, ConfigError> {
        ModelRef::parse(&self.model, self.revision.clone())
    }

    /// The encoder implied by the output extension.
    pub fn output_format(&self) -> Result<ImageFormat, ConfigError> {
        ImageFormat::from_path(&self.output)
            .ok()
            .filter(|format| format.writing_enabled() && RGB8_FORMATS.contains(format))
            .ok_or_else(|| ConfigError::UnsupportedOutput {
                path: self.output.clone(),
            })
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Check everything that can be checked without touching the runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prompt.trim().is_empty() {
            return Err(ConfigError::EmptyPrompt);
        }
        self.model_ref()?;
        self.output_format()?;
        let SamplingParams {
            height,
            width,
            num_steps,
            guidance_scale: _,
        } = self.sampling;
        for (name, value) in [("height", height), ("width", width), ("num_steps", num_steps)] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        if self.timeout_secs == Some(0) {
            return Err(ConfigError::Zero("timeout_secs"));
        }
        Ok(())
    }
}
