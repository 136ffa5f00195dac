use std::{
    path::PathBuf,
    sync::{mpsc, Arc},
    thread,
    time::{Duration, Instant},
};

use image::{DynamicImage, ImageFormat};
use tracing::{info, warn};

use crate::{
    output::save_image, DeviceSpec, GenerateError, GeneratedImages, GenerationConfig,
    ImagePipeline, PipelineRuntime, SamplingParams,
};

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct GenerationReport {
    pub output: PathBuf,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    /// The device the weights were placed on.
    pub device: DeviceSpec,
    pub load_time: Duration,
    pub generation_time: Duration,
}

/// Generate one image from `config.prompt` and write it to `config.output`.
///
/// Stages run in order: configuration, device, model resolution, loading, generation, output.
/// Nothing is written unless every stage before output succeeded.
pub fn generate<R: PipelineRuntime>(
    runtime: &R,
    config: &GenerationConfig,
) -> Result<GenerationReport, GenerateError> {
    config.validate()?;
    let model = config.model_ref()?;
    let format = config.output_format()?;

    let device = runtime.bind_device(&config.device)?;
    info!("device selected is {device}.");

    runtime.resolve(&model)?;
    info!("loading `{model}` with precision {}.", config.precision);

    let start = Instant::now();
    let pipeline = runtime.load(&model, config.precision, &device)?;
    let load_time = start.elapsed();
    info!("pipeline loaded in {:.2}s.", load_time.as_secs_f32());

    let start = Instant::now();
    let images = match config.timeout() {
        Some(limit) => {
            invoke_with_timeout(Arc::new(pipeline), &config.prompt, config.sampling, limit)?
        }
        None => pipeline
            .generate(&config.prompt, &config.sampling)
            .map_err(|e| GenerateError::Generation(e.into()))?,
    };
    let generation_time = start.elapsed();
    info!(
        "image generation took {:.2}s, {} image(s) returned.",
        generation_time.as_secs_f32(),
        images.images.len()
    );

    let image = images.into_first()?;
    write_output(&image, config, format)?;
    info!("saved image to `{}`.", config.output.display());

    Ok(GenerationReport {
        output: config.output.clone(),
        format,
        width: image.width(),
        height: image.height(),
        device,
        load_time,
        generation_time,
    })
}

fn write_output(
    image: &DynamicImage,
    config: &GenerationConfig,
    format: ImageFormat,
) -> Result<(), GenerateError> {
    save_image(image, &config.output, format).map_err(|source| GenerateError::Output {
        path: config.output.clone(),
        width: image.width(),
        height: image.height(),
        source,
    })
}

/// The pipeline call itself cannot be interrupted, so on timeout the worker is left running.
fn invoke_with_timeout<P: ImagePipeline>(
    pipeline: Arc<P>,
    prompt: &str,
    params: SamplingParams,
    limit: Duration,
) -> Result<GeneratedImages, GenerateError> {
    let (tx, rx) = mpsc::channel();
    let prompt = prompt.to_string();
    thread::Builder::new()
        .name("txt2img-generate".to_string())
        .spawn(move || {
            let _ = tx.send(pipeline.generate(&prompt, &params));
        })
        .map_err(|e| GenerateError::Generation(e.into()))?;

    match rx.recv_timeout(limit) {
        Ok(res) => res.map_err(|e| GenerateError::Generation(e.into())),
        Err(mpsc::RecvTimeoutError::Timeout) => {
            warn!("generation exceeded {}s, abandoning it.", limit.as_secs());
            Err(GenerateError::TimedOut { after: limit })
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(GenerateError::Generation(
            "generation worker exited without a result".into(),
        )),
    }
}
