use txt2img_core::{generate, DeviceSpec, DiffusionRsRuntime, GenerationConfig, Precision};

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // FLUX.1-schnell with its 4-step, guidance-free sampling
    let config = GenerationConfig {
        model: "black-forest-labs/FLUX.1-schnell".to_string(),
        precision: Precision::BF16,
        device: DeviceSpec::Metal(0),
        prompt: "Dhoni hitting a six".to_string(),
        output: "output.png".into(),
        ..Default::default()
    };

    let report = generate(&DiffusionRsRuntime::default(), &config)?;
    println!("Took: {:.2}s", report.generation_time.as_secs_f32());

    Ok(())
}
