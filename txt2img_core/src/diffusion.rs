use diffusion_rs_common::core::{DType, Device, DeviceLocation, Error as CoreError, Tensor};
use diffusion_rs_core::{DiffusionGenerationParams, ModelDType, ModelSource, Pipeline, TokenSource};
use tracing::info;

use crate::{
    DeviceSpec, GenerateError, GeneratedImages, ImagePipeline, ModelRef, PipelineRuntime,
    Precision, SamplingParams,
};

pub use diffusion_rs_core::Offloading;

/// [`PipelineRuntime`] backed by `diffusion_rs_core`.
#[derive(Debug, Clone, Default)]
pub struct DiffusionRsRuntime {
    /// Hugging Face token. Useful for accessing gated repositories.
    /// By default, the Hugging Face token at ~/.cache/huggingface/token is used.
    pub token: Option<String>,
    /// Offloading setting to use for this model.
    pub offloading: Option<Offloading>,
    /// Hide download and loading progress bars.
    pub silent: bool,
}

/// A loaded `diffusion_rs_core` pipeline.
pub struct DiffusionRsPipeline(Pipeline);

impl ImagePipeline for DiffusionRsPipeline {
    fn generate(&self, prompt: &str, params: &SamplingParams) -> anyhow::Result<GeneratedImages> {
        let images = self.0.forward(
            vec![prompt.to_string()],
            DiffusionGenerationParams {
                height: params.height,
                width: params.width,
                num_steps: params.num_steps,
                guidance_scale: params.guidance_scale,
            },
        )?;
        Ok(images.into())
    }
}

// Must agree with where `Pipeline::load` puts the weights.
fn runtime_device() -> diffusion_rs_common::core::Result<Device> {
    #[cfg(not(feature = "metal"))]
    let device = Device::cuda_if_available(0);
    #[cfg(feature = "metal")]
    let device = Device::new_metal(0);
    device
}

fn open_device(spec: DeviceSpec) -> diffusion_rs_common::core::Result<Device> {
    match spec {
        DeviceSpec::Auto => runtime_device(),
        DeviceSpec::Cpu => Ok(Device::Cpu),
        DeviceSpec::Cuda(ordinal) => Device::new_cuda(ordinal),
        DeviceSpec::Metal(ordinal) => Device::new_metal(ordinal),
    }
}

fn spec_of(device: &Device) -> DeviceSpec {
    match device.location() {
        DeviceLocation::Cpu => DeviceSpec::Cpu,
        DeviceLocation::Cuda { gpu_id } => DeviceSpec::Cuda(gpu_id),
        DeviceLocation::Metal { gpu_id } => DeviceSpec::Metal(gpu_id),
    }
}

fn is_device_fault(err: &CoreError) -> bool {
    match err {
        CoreError::Cuda(_) | CoreError::Metal(_) => true,
        // If running with RUST_BACKTRACE=1
        CoreError::WithBacktrace { inner, .. } => is_device_fault(inner),
        _ => false,
    }
}

/// Runtime CUDA/Metal faults while loading are device problems, anything else means the model
/// could not be turned into a pipeline.
fn classify_load_error(model: &ModelRef, device: DeviceSpec, e: anyhow::Error) -> GenerateError {
    let on_device = e
        .chain()
        .filter_map(|cause| cause.downcast_ref::<CoreError>())
        .any(is_device_fault);
    if on_device {
        GenerateError::device(device, format!("{e:#}"))
    } else {
        GenerateError::resolution(model, e)
    }
}

impl From<Precision> for ModelDType {
    fn from(precision: Precision) -> Self {
        match precision {
            Precision::Auto => Self::Auto,
            Precision::BF16 => Self::BF16,
            Precision::F16 => Self::F16,
            Precision::F32 => Self::F32,
        }
    }
}

impl PipelineRuntime for DiffusionRsRuntime {
    type Pipeline = DiffusionRsPipeline;

    fn bind_device(&self, requested: &DeviceSpec) -> Result<DeviceSpec, GenerateError> {
        let placed = runtime_device().map_err(|e| GenerateError::device(*requested, e))?;
        let placed_spec = spec_of(&placed);

        let device = match requested {
            DeviceSpec::Auto => placed,
            spec => {
                let device = open_device(*spec).map_err(|e| GenerateError::device(*spec, e))?;
                if device.location() != placed.location() {
                    return Err(GenerateError::device(
                        *spec,
                        format!("this build places model weights on {placed_spec}"),
                    ));
                }
                device
            }
        };

        // Try an allocation
        Tensor::zeros((2, 2), DType::F32, &device)
            .map_err(|e| GenerateError::device(*requested, e))?;

        Ok(placed_spec)
    }

    fn resolve(&self, model: &ModelRef) -> Result<(), GenerateError> {
        info!("resolving model {model}.");
        model
            .check_available(self.token.clone())
            .map_err(|e| GenerateError::resolution(model, e))
    }

    fn load(
        &self,
        model: &ModelRef,
        precision: Precision,
        device: &DeviceSpec,
    ) -> Result<Self::Pipeline, GenerateError> {
        let (source, revision) = match model {
            ModelRef::Hub { model_id, revision } => {
                (ModelSource::from_model_id(model_id), revision.clone())
            }
            ModelRef::Dduf(path) => (
                ModelSource::dduf(path.display())
                    .map_err(|e| GenerateError::resolution(model, e))?,
                None,
            ),
        };
        let token = self
            .token
            .clone()
            .map(TokenSource::Literal)
            .unwrap_or(TokenSource::CacheToken);

        Pipeline::load(
            source,
            self.silent,
            token,
            revision,
            self.offloading,
            &ModelDType::from(precision),
        )
        .map(DiffusionRsPipeline)
        .map_err(|e| classify_load_error(model, *device, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precision_maps_onto_runtime_dtype() {
        assert_eq!(ModelDType::from(Precision::Auto), ModelDType::Auto);
        assert_eq!(ModelDType::from(Precision::BF16), ModelDType::BF16);
        assert_eq!(ModelDType::from(Precision::F16), ModelDType::F16);
        assert_eq!(ModelDType::from(Precision::F32), ModelDType::F32);
    }

    #[test]
    fn cpu_location() {
        assert_eq!(spec_of(&Device::Cpu), DeviceSpec::Cpu);
    }

    #[cfg(not(any(feature = "cuda", feature = "metal")))]
    #[test]
    fn cpu_build_binds_cpu() {
        let runtime = DiffusionRsRuntime::default();
        assert_eq!(runtime.bind_device(&DeviceSpec::Auto).unwrap(), DeviceSpec::Cpu);
        assert_eq!(runtime.bind_device(&DeviceSpec::Cpu).unwrap(), DeviceSpec::Cpu);
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn cuda_needs_the_cuda_feature() {
        let err = DiffusionRsRuntime::default()
            .bind_device(&DeviceSpec::Cuda(0))
            .unwrap_err();
        assert!(matches!(
            err,
            GenerateError::Device {
                device: DeviceSpec::Cuda(0),
                ..
            }
        ));
    }

    fn flux() -> ModelRef {
        ModelRef::parse("black-forest-labs/FLUX.1-schnell", None).unwrap()
    }

    #[test]
    fn plain_runtime_error_is_a_resolution_failure() {
        let err = classify_load_error(
            &flux(),
            DeviceSpec::Cuda(0),
            anyhow::Error::from(CoreError::Msg("missing tensor `x_embedder.weight`".to_string())),
        );
        assert!(matches!(err, GenerateError::Resolution { .. }));
    }

    #[test]
    fn cuda_fault_under_context_is_a_device_failure() {
        let e = anyhow::Error::from(CoreError::Cuda("out of memory".into()))
            .context("loading transformer");
        let err = classify_load_error(&flux(), DeviceSpec::Cuda(0), e);
        match err {
            GenerateError::Device { device, reason } => {
                assert_eq!(device, DeviceSpec::Cuda(0));
                assert!(reason.contains("out of memory"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn metal_fault_with_backtrace_is_a_device_failure() {
        let e = anyhow::Error::from(CoreError::WithBacktrace {
            inner: Box::new(CoreError::Metal("command buffer failed".to_string().into())),
            backtrace: Box::new(std::backtrace::Backtrace::disabled()),
        });
        let err = classify_load_error(&flux(), DeviceSpec::Metal(0), e);
        assert!(matches!(
            err,
            GenerateError::Device {
                device: DeviceSpec::Metal(0),
                ..
            }
        ));
    }

    #[test]
    fn missing_dduf_fails_resolution() {
        let model = ModelRef::Dduf("/no/such/model.dduf".into());
        let err = DiffusionRsRuntime::default().resolve(&model).unwrap_err();
        assert!(matches!(err, GenerateError::Resolution { .. }));
    }

    /// Write a DDUF archive holding only a `model_index.json` naming `class_name`.
    fn dduf_with_index(name: &str, class_name: &str) -> std::path::PathBuf {
        use std::io::Write;

        let dir = std::env::temp_dir().join(format!("txt2img-dduf-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let mut zip = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
        zip.start_file("model_index.json", zip::write::SimpleFileOptions::default())
            .unwrap();
        write!(zip, r#"{{ "_class_name": "{class_name}" }}"#).unwrap();
        zip.finish().unwrap();
        path
    }

    #[test]
    fn unsupported_architecture_fails_resolution() {
        let path = dduf_with_index("sd3.dduf", "StableDiffusion3Pipeline");
        let model = ModelRef::Dduf(path.clone());
        let err = DiffusionRsRuntime::default().resolve(&model).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        match err {
            GenerateError::Resolution { source, .. } => {
                let reason = source.to_string();
                assert!(reason.contains("`StableDiffusion3Pipeline` is not supported"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn flux_dduf_resolves() {
        let path = dduf_with_index("flux.dduf", "FluxPipeline");
        let res = DiffusionRsRuntime::default().resolve(&ModelRef::Dduf(path.clone()));
        std::fs::remove_file(&path).unwrap();
        assert!(res.is_ok());
    }

    // Resolution runs before any weights are loaded, so an unsupported model never reaches
    // `Pipeline::load` and the output file is never created.
    #[cfg(not(any(feature = "cuda", feature = "metal")))]
    #[test]
    fn unsupported_architecture_stops_before_load() {
        let path = dduf_with_index("sd3-shell.dduf", "StableDiffusion3Pipeline");
        let output = path.with_extension("png");
        let config = crate::GenerationConfig {
            model: path.display().to_string(),
            device: DeviceSpec::Cpu,
            output: output.clone(),
            ..Default::default()
        };
        let err = crate::generate(&DiffusionRsRuntime::default(), &config).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(err.stage(), crate::Stage::Resolution);
        assert!(err.to_string().contains("sd3-shell.dduf"), "{err}");
        assert!(!output.exists());
    }
}
