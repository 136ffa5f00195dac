use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use cliclack::input;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use txt2img_core::{
    generate, DeviceSpec, DiffusionRsRuntime, GenerateError, GenerationConfig, Offloading,
    Precision,
};

#[derive(Parser, Debug)]
#[command(version, about = "Generate one image from a text prompt.")]
struct Args {
    /// JSON config file. Flags given on the command line take precedence over it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Model to load: a Hugging Face model ID or a path to a .dduf file.
    #[arg(short, long)]
    model: Option<String>,

    /// Hugging Face revision of the model.
    #[arg(long)]
    revision: Option<String>,

    /// Numeric precision for the model weights.
    #[arg(long)]
    precision: Option<Precision>,

    /// Compute device: auto, cpu, cuda[:N], metal[:N] or mps[:N].
    #[arg(short, long)]
    device: Option<DeviceSpec>,

    /// Prompt to use.
    #[arg(short, long)]
    prompt: Option<String>,

    /// Where to save the image. The extension selects the format (png, jpg, ...).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Image height in pixels.
    #[arg(long)]
    height: Option<usize>,

    /// Image width in pixels.
    #[arg(long)]
    width: Option<usize>,

    /// Number of denoising steps. This is model specific. A higher number of steps often means higher quality.
    #[arg(short, long)]
    num_steps: Option<usize>,

    /// Guidance scale to use. This is model specific.
    #[arg(short = 's', long)]
    guidance_scale: Option<f64>,

    /// Give up on generation after this many seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Hugging Face token. Useful for accessing gated repositories.
    /// By default, the Hugging Face token at ~/.cache/huggingface/token is used.
    #[arg(long)]
    token: Option<String>,

    /// Offloading setting to use for this model.
    #[arg(long)]
    offloading: Option<Offloading>,

    /// Hide download and loading progress bars.
    #[arg(long)]
    silent: bool,

    /// Ask for the prompt on the terminal.
    #[arg(short, long)]
    interactive: bool,
}

impl Args {
    fn apply(&self, config: &mut GenerationConfig) {
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(revision) = &self.revision {
            config.revision = Some(revision.clone());
        }
        if let Some(precision) = self.precision {
            config.precision = precision;
        }
        if let Some(device) = self.device {
            config.device = device;
        }
        if let Some(prompt) = &self.prompt {
            config.prompt = prompt.clone();
        }
        if let Some(output) = &self.output {
            config.output = output.clone();
        }
        if let Some(height) = self.height {
            config.sampling.height = height;
        }
        if let Some(width) = self.width {
            config.sampling.width = width;
        }
        if let Some(num_steps) = self.num_steps {
            config.sampling.num_steps = num_steps;
        }
        if let Some(guidance_scale) = self.guidance_scale {
            config.sampling.guidance_scale = guidance_scale;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = Some(timeout);
        }
    }

    fn runtime(&self) -> DiffusionRsRuntime {
        DiffusionRsRuntime {
            token: self.token.clone(),
            offloading: self.offloading,
            silent: self.silent,
        }
    }
}

fn ask_prompt(default: &str) -> anyhow::Result<String> {
    let prompt: String = input("Prompt:")
        .default_input(default)
        .validate(|input: &String| {
            if input.trim().is_empty() {
                Err("Prompt is required!")
            } else {
                Ok(())
            }
        })
        .interact()?;
    Ok(prompt)
}

fn run(args: Args) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => GenerationConfig::from_json_file(path).map_err(GenerateError::from)?,
        None => GenerationConfig::default(),
    };
    args.apply(&mut config);
    if args.interactive {
        config.prompt = ask_prompt(&config.prompt)?;
    }

    let report = generate(&args.runtime(), &config)?;

    println!(
        "Image generation took: {:.2}s (loading: {:.2}s)",
        report.generation_time.as_secs_f32(),
        report.load_time.as_secs_f32()
    );
    println!(
        "Saved {}x{} {:?} image to {} ({}).",
        report.width,
        report.height,
        report.format,
        report.output.display(),
        report.device
    );

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match e.downcast_ref::<GenerateError>() {
            Some(failure) => {
                let stage = failure.stage();
                eprintln!("error during {stage}: {e:#}");
                ExitCode::from(stage.exit_code())
            }
            None => {
                eprintln!("error: {e:#}");
                ExitCode::FAILURE
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "txt2img",
            "--model",
            "black-forest-labs/FLUX.1-schnell",
            "--precision",
            "bf16",
            "--device",
            "mps",
            "-p",
            "a cat in a spacesuit",
            "-o",
            "cat.jpg",
            "--width",
            "1280",
            "-n",
            "2",
            "-s",
            "1.5",
            "--timeout",
            "600",
        ])
        .unwrap();
        let mut config = GenerationConfig::default();
        args.apply(&mut config);

        assert_eq!(config.model, "black-forest-labs/FLUX.1-schnell");
        assert_eq!(config.precision, Precision::BF16);
        assert_eq!(config.device, DeviceSpec::Metal(0));
        assert_eq!(config.prompt, "a cat in a spacesuit");
        assert_eq!(config.output, PathBuf::from("cat.jpg"));
        assert_eq!(config.sampling.width, 1280);
        assert_eq!(config.sampling.height, 1024);
        assert_eq!(config.sampling.num_steps, 2);
        assert_eq!(config.sampling.guidance_scale, 1.5);
        assert_eq!(config.timeout_secs, Some(600));
    }

    #[test]
    fn no_flags_keep_config() {
        let args = Args::try_parse_from(["txt2img"]).unwrap();
        let mut config = GenerationConfig {
            prompt: "from file".to_string(),
            ..Default::default()
        };
        args.apply(&mut config);
        assert_eq!(config.prompt, "from file");
        assert_eq!(config.model, GenerationConfig::default().model);
    }

    #[test]
    fn unknown_device_is_rejected_by_the_parser() {
        assert!(Args::try_parse_from(["txt2img", "--device", "tpu"]).is_err());
    }

    #[test]
    fn runtime_options() {
        let args =
            Args::try_parse_from(["txt2img", "--token", "hf_abc", "--offloading", "full"]).unwrap();
        let runtime = args.runtime();
        assert_eq!(runtime.token.as_deref(), Some("hf_abc"));
        assert_eq!(runtime.offloading, Some(Offloading::Full));
        assert!(!runtime.silent);
    }
}
