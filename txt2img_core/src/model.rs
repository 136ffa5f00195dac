use std::{
    fmt::Display,
    fs::{self, File},
    io::Read,
    path::{Path, PathBuf},
};

use hf_hub::{api::sync::ApiBuilder, Repo, RepoType};
use serde::Deserialize;
use tracing::info;
use zip::ZipArchive;

use crate::ConfigError;

const DDUF_EXTENSION: &str = "dduf";
const MODEL_INDEX: &str = "model_index.json";

/// Pipeline classes `diffusion_rs_core` has a loader for.
pub(crate) const SUPPORTED_ARCHITECTURES: &[&str] = &["FluxPipeline"];

/// Where the pretrained pipeline comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelRef {
    /// A Hugging Face model repository.
    Hub {
        model_id: String,
        revision: Option<String>,
    },
    /// A local single-file DDUF archive.
    Dduf(PathBuf),
}

impl Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hub {
                model_id,
                revision: None,
            } => write!(f, "{model_id}"),
            Self::Hub {
                model_id,
                revision: Some(revision),
            } => write!(f, "{model_id}@{revision}"),
            Self::Dduf(path) => write!(f, "{}", path.display()),
        }
    }
}

impl ModelRef {
    /// Identifiers ending in `.dduf` are local archives, everything else is a hub model ID.
    pub fn parse(id: &str, revision: Option<String>) -> Result<Self, ConfigError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(ConfigError::EmptyModel);
        }
        let is_dduf = Path::new(id)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(DDUF_EXTENSION));
        if is_dduf {
            Ok(Self::Dduf(PathBuf::from(id)))
        } else {
            Ok(Self::Hub {
                model_id: id.to_string(),
                revision,
            })
        }
    }

    /// Make sure the model exists and is an architecture the runtime can load, before any
    /// weights are pulled.
    ///
    /// Hub repositories must list a `model_index.json`; DDUF archives must contain one.
    pub(crate) fn check_available(&self, token: Option<String>) -> anyhow::Result<()> {
        let model_index = match self {
            Self::Dduf(path) => {
                if !path.is_file() {
                    anyhow::bail!("DDUF file `{}` does not exist", path.display());
                }
                let mut archive = ZipArchive::new(File::open(path)?)?;
                let mut file = archive.by_name(MODEL_INDEX).map_err(|_| {
                    anyhow::anyhow!(
                        "Expected `{MODEL_INDEX}` file present in `{}`.",
                        path.display()
                    )
                })?;
                let mut raw = String::new();
                file.read_to_string(&mut raw)?;
                raw
            }
            Self::Hub { model_id, revision } => {
                let mut builder = ApiBuilder::new().with_progress(false);
                if token.is_some() {
                    builder = builder.with_token(token);
                }
                let api = builder.build()?;
                let repo = api.repo(Repo::with_revision(
                    model_id.clone(),
                    RepoType::Model,
                    revision.clone().unwrap_or("main".to_string()),
                ));
                let files = repo
                    .info()
                    .map(|info| {
                        info.siblings
                            .into_iter()
                            .map(|x| x.rfilename)
                            .collect::<Vec<_>>()
                    })
                    .map_err(|e| anyhow::Error::msg(e.to_string()))?;
                if !files.iter().any(|file| file == MODEL_INDEX) {
                    anyhow::bail!("Expected `{MODEL_INDEX}` file present in `{model_id}`.");
                }
                info!("found {} files in `{model_id}`.", files.len());
                let path = repo
                    .get(MODEL_INDEX)
                    .map_err(|e| anyhow::Error::msg(e.to_string()))?;
                fs::read_to_string(path)?
            }
        };

        let architecture = supported_architecture(&model_index)?;
        info!("model architecture is: {architecture}");
        Ok(())
    }
}

#[derive(Deserialize)]
struct ModelIndex {
    #[serde(rename = "_class_name")]
    name: String,
}

/// Read the pipeline class out of a `model_index.json` and check that the runtime has a loader for it.
fn supported_architecture(model_index: &str) -> anyhow::Result<String> {
    let ModelIndex { name } = serde_json::from_str(model_index)
        .map_err(|e| anyhow::anyhow!("`{MODEL_INDEX}` has no usable `_class_name`: {e}"))?;
    if !SUPPORTED_ARCHITECTURES.contains(&name.as_str()) {
        anyhow::bail!(
            "architecture `{name}` is not supported by diffusion_rs (supported: {})",
            SUPPORTED_ARCHITECTURES.join(", ")
        );
    }
    Ok(name)
}
