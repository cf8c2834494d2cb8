//! snipocr - region-select OCR CLI
//!
//! Preprocess and recognize image regions from the command line, or run the
//! interactive session protocol as JSON lines over stdin/stdout.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::future::join_all;
use snipocr_core::logging::{init_component_logger, Component};
use snipocr_core::{AppConfig, BackendKind, CoreEvent, HostCommand, SessionRunner};
use snipocr_imaging::{otsu_threshold, pipeline, preprocess, DeviceRect, PixelBuffer, PreprocessConfig};
use snipocr_ocr::{
    most_confident, EncodedImage, LocalBackend, RecognitionAdapter, RecognitionResult,
};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "snipocr")]
#[command(about = "Select a region, make it legible, read its text")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Named profile from the configuration file
    #[arg(short, long, global = true)]
    profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the preprocessing pipeline and write the result as PNG
    Preprocess {
        /// Source image
        input: PathBuf,

        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Output PNG path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Preprocess and recognize, printing one JSON event line
    Recognize {
        /// Source image
        input: PathBuf,

        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Backend (defaults to the configured one)
        #[arg(short, long, value_enum)]
        backend: Option<BackendKind>,
    },

    /// Recognize with every available backend and keep the most confident
    Compare {
        /// Source image
        input: PathBuf,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Run the host session protocol over stdin/stdout (JSON lines)
    Session {
        /// Backend (defaults to the configured one)
        #[arg(short, long, value_enum)]
        backend: Option<BackendKind>,
    },

    /// Check backend availability
    Check,
}

#[derive(Args)]
struct PipelineArgs {
    /// Crop region in device pixels: x,y,w,h (defaults to the whole image)
    #[arg(long, value_parser = parse_rect)]
    rect: Option<DeviceRect>,

    /// Binarization cutoff 0-255, or "auto" for an Otsu threshold
    #[arg(short, long, value_parser = parse_threshold)]
    threshold: Option<ThresholdArg>,

    /// Upscale factor in [1, 4]
    #[arg(short, long)]
    scale: Option<f64>,

    /// Invert as the final stage
    #[arg(long)]
    invert: bool,

    /// Keep color unless thresholding
    #[arg(long)]
    no_grayscale: bool,

    /// Median-filter speckle noise before binarization
    #[arg(long)]
    denoise: bool,

    /// Binarize against the local mean instead of a single cutoff
    #[arg(long)]
    adaptive: bool,

    /// Remove specks and close gaps in binarized strokes
    #[arg(long)]
    morphology: bool,
}

#[derive(Debug, Clone, Copy)]
enum ThresholdArg {
    Auto,
    Fixed(u8),
}

fn parse_rect(s: &str) -> Result<DeviceRect, String> {
    let parts: Vec<u32> = s
        .split(',')
        .map(|p| p.trim().parse::<u32>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid rect '{}': {}", s, e))?;
    match parts.as_slice() {
        [x, y, w, h] if *w > 0 && *h > 0 => Ok(DeviceRect::new(*x, *y, *w, *h)),
        [_, _, _, _] => Err("rect width and height must be positive".to_string()),
        _ => Err(format!("expected x,y,w,h, got '{}'", s)),
    }
}

fn parse_threshold(s: &str) -> Result<ThresholdArg, String> {
    if s.eq_ignore_ascii_case("auto") {
        return Ok(ThresholdArg::Auto);
    }
    s.parse::<u8>()
        .map(ThresholdArg::Fixed)
        .map_err(|_| format!("threshold must be 0-255 or 'auto', got '{}'", s))
}

impl PipelineArgs {
    /// Crop region and pipeline settings for `source`, on top of `base`
    fn resolve(&self, base: PreprocessConfig, source: &PixelBuffer) -> Result<(DeviceRect, PreprocessConfig)> {
        let rect = self
            .rect
            .unwrap_or_else(|| DeviceRect::full(source.width(), source.height()));

        let mut config = base.with_invert(base.invert || self.invert);
        if self.no_grayscale {
            config.grayscale = false;
        }
        config.denoise |= self.denoise;
        config.adaptive |= self.adaptive;
        config.morphology |= self.morphology;
        if let Some(scale) = self.scale {
            config = config.with_scale(scale);
        }
        match self.threshold {
            Some(ThresholdArg::Fixed(t)) => config = config.with_threshold(t),
            Some(ThresholdArg::Auto) => {
                let region = pipeline::crop(source, rect)?;
                let t = otsu_threshold(&region);
                info!("automatic threshold: {}", t);
                config = config.with_threshold(t);
            }
            None => {}
        }
        config.validate()?;
        Ok((rect, config))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let component = match cli.command {
        Commands::Session { .. } => Component::Session,
        Commands::Recognize { .. } | Commands::Compare { .. } => Component::Recognize,
        Commands::Check => Component::Check,
        Commands::Preprocess { .. } => Component::Cli,
    };
    init_component_logger(component, cli.verbose)?;

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(profile) = cli.profile.as_deref() {
        config = config.apply_profile(profile)?;
        info!("using profile '{}'", profile);
    }

    match cli.command {
        Commands::Preprocess {
            input,
            pipeline,
            output,
        } => {
            cmd_preprocess(&config, &input, &pipeline, &output)?;
        }
        Commands::Recognize {
            input,
            pipeline,
            backend,
        } => {
            let backend = backend.unwrap_or(config.recognition.backend);
            cmd_recognize(&config, &input, &pipeline, backend)?;
        }
        Commands::Compare { input, pipeline } => {
            cmd_compare(&config, &input, &pipeline)?;
        }
        Commands::Session { backend } => {
            let backend = backend.unwrap_or(config.recognition.backend);
            cmd_session(&config, backend)?;
        }
        Commands::Check => {
            cmd_check(&config)?;
        }
    }

    Ok(())
}

fn load_image(path: &Path) -> Result<PixelBuffer> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {:?}", path))?;
    PixelBuffer::decode(&bytes).with_context(|| format!("failed to decode {:?}", path))
}

/// Load, crop and preprocess `input`
fn prepare(config: &AppConfig, input: &Path, args: &PipelineArgs) -> Result<PixelBuffer> {
    let source = load_image(input)?;
    let (rect, preprocess_config) = args.resolve(config.preprocess, &source)?;
    debug!("pipeline settings: {:?}", preprocess_config);
    Ok(preprocess(&source, rect, &preprocess_config)?)
}

fn print_event(event: &CoreEvent) -> Result<()> {
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}

fn cmd_preprocess(config: &AppConfig, input: &Path, args: &PipelineArgs, output: &Path) -> Result<()> {
    let processed = prepare(config, input, args)?;
    std::fs::write(output, processed.encode_png()?)
        .with_context(|| format!("failed to write {:?}", output))?;
    info!(
        "wrote {}x{} image to {:?}",
        processed.width(),
        processed.height(),
        output
    );
    Ok(())
}

#[tokio::main]
async fn cmd_recognize(config: &AppConfig, input: &Path, args: &PipelineArgs, kind: BackendKind) -> Result<()> {
    let image = EncodedImage::png(prepare(config, input, args)?.encode_png()?);
    let adapter = RecognitionAdapter::new(config.build_backend(kind)?);

    info!("recognizing {:?} with {} backend", input, kind);
    match adapter.recognize(&image, &config.recognition.options).await {
        Ok(result) => print_event(&CoreEvent::RecognitionResult(result)),
        Err(e) => {
            print_event(&CoreEvent::RecognitionError {
                message: e.to_string(),
            })?;
            Err(anyhow::anyhow!("recognition failed"))
        }
    }
}

#[tokio::main]
async fn cmd_compare(config: &AppConfig, input: &Path, args: &PipelineArgs) -> Result<()> {
    let image = &EncodedImage::png(prepare(config, input, args)?.encode_png()?);
    let options = &config.recognition.options;

    let mut adapters = Vec::new();
    for kind in BackendKind::ALL {
        match config.build_backend(kind) {
            Ok(backend) => adapters.push((kind, RecognitionAdapter::new(backend))),
            Err(e) => warn!("skipping {} backend: {:#}", kind, e),
        }
    }
    if adapters.is_empty() {
        return Err(anyhow::anyhow!("no recognition backend is available"));
    }

    let runs = adapters.iter().map(|(kind, adapter)| async move {
        (*kind, adapter.recognize(image, options).await)
    });
    let mut successes: Vec<RecognitionResult> = Vec::new();
    for (kind, outcome) in join_all(runs).await {
        match outcome {
            Ok(result) => {
                eprintln!(
                    "  {:<7} {:5.1}%  {:>5}ms  {:?}",
                    kind.to_string(),
                    result.confidence,
                    result.duration_ms,
                    result.text
                );
                successes.push(result);
            }
            Err(e) => eprintln!("  {:<7} failed: {}", kind.to_string(), e),
        }
    }

    match most_confident(successes) {
        Some(best) => print_event(&CoreEvent::RecognitionResult(best)),
        None => {
            print_event(&CoreEvent::RecognitionError {
                message: "every backend failed".to_string(),
            })?;
            Err(anyhow::anyhow!("recognition failed"))
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn cmd_session(config: &AppConfig, kind: BackendKind) -> Result<()> {
    let backend = config.build_backend(kind)?;
    let runner = SessionRunner::new(config.session_settings(), backend);

    let (command_tx, command_rx) = mpsc::channel::<HostCommand>(64);
    let (event_tx, mut event_rx) = mpsc::channel::<CoreEvent>(64);

    let reader = async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HostCommand>(&line) {
                Ok(command) => {
                    if command_tx.send(command).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("ignoring malformed command: {}", e),
            }
        }
        debug!("stdin closed");
        anyhow::Ok(())
    };

    let writer = async move {
        let mut stdout = tokio::io::stdout();
        while let Some(event) = event_rx.recv().await {
            let mut line = serde_json::to_string(&event)?;
            line.push('\n');
            stdout.write_all(line.as_bytes()).await?;
            stdout.flush().await?;
        }
        anyhow::Ok(())
    };

    let (read, (), written) = tokio::join!(reader, runner.run(command_rx, event_tx), writer);
    read?;
    written.context("failed to write events")?;
    Ok(())
}

fn cmd_check(config: &AppConfig) -> Result<()> {
    println!("checking backends...\n");

    let local_ok = LocalBackend::new(config.local.clone()).is_available();
    println!(
        "  local ({}): {}",
        config.local.binary.display(),
        if local_ok { "OK" } else { "NOT FOUND" }
    );

    let remote = config.build_backend(BackendKind::Remote);
    println!(
        "  remote: {}",
        if remote.is_ok() { "OK" } else { "no API key (set OCR_SPACE_API_KEY)" }
    );

    let chat = config.build_backend(BackendKind::Chat);
    println!(
        "  chat:   {}",
        if chat.is_ok() { "OK" } else { "no API key (set OPENROUTER_API_KEY)" }
    );

    println!();

    let configured = config.recognition.backend;
    let configured_ok = match configured {
        BackendKind::Local => local_ok,
        BackendKind::Remote => remote.is_ok(),
        BackendKind::Chat => chat.is_ok(),
    };
    if configured_ok {
        println!("configured backend '{}' is ready", configured);
    } else {
        println!("WARNING: configured backend '{}' is not available.", configured);
        if configured == BackendKind::Local {
            println!("Install Tesseract and ensure it's in your PATH.");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline_args(args: &[&str]) -> PipelineArgs {
        let base = ["snipocr", "preprocess", "in.png", "-o", "out.png"];
        let cli = Cli::try_parse_from([&base[..], args].concat()).unwrap();
        match cli.command {
            Commands::Preprocess { pipeline, .. } => pipeline,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_cleanup_flags_enable_stages() {
        let source = PixelBuffer::filled(4, 4, [200, 200, 200, 255]);
        let args = pipeline_args(&["--denoise", "--adaptive", "--morphology", "-s", "1"]);
        let (rect, config) = args.resolve(PreprocessConfig::default(), &source).unwrap();

        assert_eq!(rect, DeviceRect::full(4, 4));
        assert!(config.denoise && config.adaptive && config.morphology);
        assert_eq!(config.scale, 1.0);
    }

    #[test]
    fn test_cleanup_stages_off_without_flags() {
        let source = PixelBuffer::filled(4, 4, [200, 200, 200, 255]);
        let (_, config) = pipeline_args(&[])
            .resolve(PreprocessConfig::default(), &source)
            .unwrap();
        assert_eq!(config, PreprocessConfig::default());
    }
}
