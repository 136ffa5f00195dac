use std::{fmt::Display, str::FromStr};

use thiserror::Error;

/// Compute backend to run the pipeline on.
///
/// Parsed from `auto`, `cpu`, `cuda`, `cuda:N`, `metal`, `metal:N`. `mps` is accepted as an alias
/// for `metal`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DeviceSpec {
    /// Whatever the runtime picks for this build.
    #[default]
    Auto,
    Cpu,
    Cuda(usize),
    Metal(usize),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown device `{0}`, expected one of: auto, cpu, cuda[:N], metal[:N], mps[:N]")]
pub struct ParseDeviceError(String);

impl FromStr for DeviceSpec {
    type Err = ParseDeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let (kind, ordinal) = match lowered.split_once(':') {
            Some((kind, ordinal)) => {
                let ordinal = ordinal
                    .parse::<usize>()
                    .map_err(|_| ParseDeviceError(s.to_string()))?;
                (kind, Some(ordinal))
            }
            None => (lowered.as_str(), None),
        };
        match (kind, ordinal) {
            ("auto", None) => Ok(Self::Auto),
            ("cpu", None) => Ok(Self::Cpu),
            ("cuda", ordinal) => Ok(Self::Cuda(ordinal.unwrap_or(0))),
            ("metal" | "mps", ordinal) => Ok(Self::Metal(ordinal.unwrap_or(0))),
            _ => Err(ParseDeviceError(s.to_string())),
        }
    }
}

serde_plain::derive_deserialize_from_fromstr!(DeviceSpec, "a device such as `cpu`, `cuda:0` or `metal`");

impl Display for DeviceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
            Self::Metal(ordinal) => write!(f, "metal:{ordinal}"),
        }
    }
}
