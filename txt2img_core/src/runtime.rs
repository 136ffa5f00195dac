use image::DynamicImage;

use crate::{DeviceSpec, GenerateError, ModelRef, Precision, SamplingParams};

/// Images produced by one pipeline invocation, in the order the pipeline returned them.
#[derive(Debug, Clone, Default)]
pub struct GeneratedImages {
    pub images: Vec<DynamicImage>,
}

impl GeneratedImages {
    /// Take the first image. An empty result is a generation failure.
    pub fn into_first(self) -> Result<DynamicImage, GenerateError> {
        self.images.into_iter().next().ok_or(GenerateError::NoImage)
    }
}

impl From<Vec<DynamicImage>> for GeneratedImages {
    fn from(images: Vec<DynamicImage>) -> Self {
        Self { images }
    }
}

/// A loaded pipeline, ready to turn a prompt into images.
pub trait ImagePipeline: Send + Sync + 'static {
    fn generate(&self, prompt: &str, params: &SamplingParams) -> anyhow::Result<GeneratedImages>;
}

/// The pretrained-model runtime: resolves models, checks devices and builds pipelines.
pub trait PipelineRuntime {
    type Pipeline: ImagePipeline;

    /// Check that `device` is usable and return the concrete device the weights will live on.
    fn bind_device(&self, device: &DeviceSpec) -> Result<DeviceSpec, GenerateError>;

    /// Check that `model` exists without loading it.
    fn resolve(&self, model: &ModelRef) -> Result<(), GenerateError>;

    fn load(
        &self,
        model: &ModelRef,
        precision: Precision,
        device: &DeviceSpec,
    ) -> Result<Self::Pipeline, GenerateError>;
}
