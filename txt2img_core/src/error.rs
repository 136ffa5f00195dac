use std::{fmt::Display, path::PathBuf, time::Duration};

use thiserror::Error;

use crate::{ConfigError, DeviceSpec};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The part of a run that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Configuration,
    Resolution,
    Device,
    Generation,
    Output,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Resolution => write!(f, "model resolution"),
            Self::Device => write!(f, "device setup"),
            Self::Generation => write!(f, "generation"),
            Self::Output => write!(f, "output"),
        }
    }
}

impl Stage {
    /// Process exit code reported by the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Configuration => 2,
            Self::Resolution => 3,
            Self::Device => 4,
            Self::Generation => 5,
            Self::Output => 6,
        }
    }
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("could not encode image")]
    Encode(#[source] image::ImageError),
    #[error("could not write file")]
    Write(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("could not resolve model `{model}`")]
    Resolution {
        model: String,
        #[source]
        source: BoxError,
    },
    #[error("device `{device}` is unavailable: {reason}")]
    Device { device: DeviceSpec, reason: String },
    #[error("pipeline invocation failed")]
    Generation(#[source] BoxError),
    #[error("generation did not finish within {}s", after.as_secs())]
    TimedOut { after: Duration },
    #[error("pipeline returned no images")]
    NoImage,
    #[error("could not save the generated {width}x{height} image to `{}`", path.display())]
    Output {
        path: PathBuf,
        width: u32,
        height: u32,
        #[source]
        source: OutputError,
    },
}

impl GenerateError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Config(_) => Stage::Configuration,
            Self::Resolution { .. } => Stage::Resolution,
            Self::Device { .. } => Stage::Device,
            Self::Generation(_) | Self::TimedOut { .. } | Self::NoImage => Stage::Generation,
            Self::Output { .. } => Stage::Output,
        }
    }

    pub(crate) fn resolution(model: impl Display, source: impl Into<BoxError>) -> Self {
        Self::Resolution {
            model: model.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn device(device: DeviceSpec, reason: impl Display) -> Self {
        Self::Device {
            device,
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let stages = [
            Stage::Configuration,
            Stage::Resolution,
            Stage::Device,
            Stage::Generation,
            Stage::Output,
        ];
        let codes = stages.iter().map(Stage::exit_code).collect::<HashSet<_>>();
        assert_eq!(codes.len(), stages.len());
        assert!(!codes.contains(&0));
        assert!(!codes.contains(&1));
    }

    #[test]
    fn stage_of_each_failure() {
        assert_eq!(
            GenerateError::from(ConfigError::EmptyPrompt).stage(),
            Stage::Configuration
        );
        assert_eq!(
            GenerateError::resolution("org/model", anyhow::anyhow!("404")).stage(),
            Stage::Resolution
        );
        assert_eq!(
            GenerateError::device(DeviceSpec::Cuda(0), "not compiled in").stage(),
            Stage::Device
        );
        assert_eq!(GenerateError::NoImage.stage(), Stage::Generation);
        assert_eq!(
            GenerateError::TimedOut {
                after: Duration::from_secs(3)
            }
            .stage(),
            Stage::Generation
        );
    }

    #[test]
    fn messages_name_the_subject() {
        let err = GenerateError::device(DeviceSpec::Metal(0), "not compiled in");
        assert_eq!(
            err.to_string(),
            "device `metal:0` is unavailable: not compiled in"
        );

        let err = GenerateError::resolution("org/missing", anyhow::anyhow!("404"));
        assert_eq!(err.to_string(), "could not resolve model `org/missing`");
        assert_eq!(
            std::error::Error::source(&err).map(ToString::to_string),
            Some("404".to_string())
        );
    }
}
