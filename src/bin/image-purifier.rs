use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use log::LevelFilter;

use image_purifier::{
    plan_jobs, AiModel, BackgroundSpec, BatchSummary, Error, ProcessingOptions, ProcessingResult,
    Processor,
};

/// Exit status when options or the input path are rejected before processing.
const EXIT_USAGE: i32 = 2;

#[derive(Parser)]
#[command(
    name = "image-purifier",
    about = "Remove AI generator watermarks and plain backgrounds from images",
    version,
    after_help = "Examples:\n  \
                  image-purifier photo.png -w\n  \
                  image-purifier renders/ -r -w -b auto -o cleaned/\n  \
                  image-purifier portrait.jpg --use-ai --ai-model rmbg\n\n\
                  AI models are read from --model-path, $U2NET_HOME or ~/.u2net\n\
                  (u2net.onnx for rembg, rmbg.onnx for rmbg) and downloaded there\n\
                  on first use. rmbg needs HF_TOKEN or HUGGING_FACE_HUB_TOKEN."
)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Input image file or directory
    input: PathBuf,

    /// Output file (single input) or directory (default: <input dir>/output)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Locate and inpaint watermarks
    #[arg(short, long)]
    watermark: bool,

    /// Remove a background color: white, green, blue, black or auto
    #[arg(short, long, value_name = "COLOR", value_parser = parse_background)]
    background: Option<BackgroundSpec>,

    /// Remove the background with a segmentation model (overrides -b)
    #[arg(long)]
    use_ai: bool,

    /// Segmentation model: rembg or rmbg (default: rembg)
    #[arg(long, value_name = "MODEL", value_parser = parse_model)]
    ai_model: Option<AiModel>,

    /// Always inpaint the whole bottom band of each image
    #[arg(long)]
    aggressive: bool,

    /// Process subdirectories, mirroring them in the output directory
    #[arg(short, long)]
    recursive: bool,

    /// ONNX model file to load instead of the default location
    #[arg(long, value_name = "FILE")]
    model_path: Option<PathBuf>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Only report failures
    #[arg(short, long)]
    quiet: bool,
}

fn parse_background(s: &str) -> Result<BackgroundSpec, String> {
    s.parse().map_err(|e: Error| e.to_string())
}

fn parse_model(s: &str) -> Result<AiModel, String> {
    s.parse().map_err(|e: Error| e.to_string())
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => LevelFilter::Error,
        (false, 0) => LevelFilter::Warn,
        (false, 1) => LevelFilter::Info,
        (false, _) => LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let options = ProcessingOptions {
        remove_watermark: cli.watermark,
        background: cli.background,
        aggressive: cli.aggressive,
        use_ai: cli.use_ai,
        ai_model: cli.ai_model,
        recursive: cli.recursive,
        model_path: cli.model_path,
    };
    let options = match options.validate() {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(EXIT_USAGE);
        }
    };

    let jobs = match plan_jobs(&cli.input, cli.output.as_deref(), &options) {
        Ok(jobs) => jobs,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(EXIT_USAGE);
        }
    };

    if jobs.is_empty() && !cli.quiet {
        eprintln!("No supported images found in {}", cli.input.display());
    }

    let mut processor = Processor::new(options);
    let results = processor.process(&jobs);
    processor.finish();

    for r in &results {
        print_result(r, cli.quiet);
    }

    let summary = BatchSummary::from_results(&results);
    if !cli.quiet || !summary.all_succeeded() {
        print_summary(&summary);
    }

    if !summary.all_succeeded() {
        process::exit(1);
    }
}

fn display_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    )
}

fn print_result(result: &ProcessingResult, quiet: bool) {
    let filename = display_name(&result.input_path);
    if result.success {
        if !quiet {
            eprintln!("[OK] {filename} -> {}", result.output_path.display());
        }
    } else {
        let reason = result
            .error
            .as_ref()
            .map_or_else(|| "unknown error".to_string(), ToString::to_string);
        eprintln!("[FAIL] {filename}: {reason}");
    }
}

fn print_summary(summary: &BatchSummary) {
    eprintln!();
    eprint!("[Summary] Processed: {}", summary.succeeded);
    if !summary.failed.is_empty() {
        eprint!(", Failed: {}", summary.failed.len());
    }
    eprintln!(" (Total: {})", summary.total());
    for (path, message) in &summary.failed {
        eprintln!("  - {}: {message}", path.display());
    }
}
