use txt2img_core::{
    generate, DeviceSpec, DiffusionRsRuntime, GenerationConfig, Offloading, Precision,
    SamplingParams,
};

use clap::{Parser, ValueEnum};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
enum Which {
    #[value(name = "schnell")]
    Schnell,
    #[value(name = "dev")]
    Dev,
}

#[derive(Parser)]
struct Args {
    /// Which model to use
    #[arg(long, default_value = "schnell")]
    which: Which,

    /// Prompt to use
    #[arg(short, long)]
    prompt: String,

    /// Device to run on
    #[arg(short, long, default_value = "auto")]
    device: DeviceSpec,

    /// Offloading setting to use for this model
    #[arg(short, long)]
    offloading: Option<Offloading>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let model = match args.which {
        Which::Dev => "black-forest-labs/FLUX.1-dev",
        Which::Schnell => "black-forest-labs/FLUX.1-schnell",
    };
    let num_steps = match args.which {
        Which::Dev => 50,
        Which::Schnell => 4,
    };
    let guidance_scale = match args.which {
        Which::Dev => 3.5,
        Which::Schnell => 0.0,
    };

    let runtime = DiffusionRsRuntime {
        offloading: args.offloading,
        ..Default::default()
    };
    let config = GenerationConfig {
        model: model.to_string(),
        precision: Precision::Auto,
        device: args.device,
        prompt: args.prompt,
        output: "image.png".into(),
        sampling: SamplingParams {
            height: 720,
            width: 1280,
            num_steps,
            guidance_scale,
        },
        ..Default::default()
    };

    let report = generate(&runtime, &config)?;
    println!("Took: {:.2}s", report.generation_time.as_secs_f32());

    Ok(())
}
