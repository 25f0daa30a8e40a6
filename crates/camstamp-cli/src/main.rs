use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use camstamp_core::{
    default_pipeline, run_batch, BatchOptions, CancellationToken, ProcessingOutcome,
    ProgressCallback, ProgressStore, ThrottledProgress, VideoPipeline, VideoTask,
};

#[derive(Parser)]
#[command(
    name = "camstamp",
    version,
    about = "Recover burned-in camera timestamps into video container metadata"
)]
struct Cli {
    /// Verbose pipeline logging; also writes a metadata sidecar per output
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Enhance one video file
    Single {
        /// Source video
        input: PathBuf,

        /// Destination file (default: <input>_enhanced.<ext> next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Location tag to embed alongside the timestamp
        #[arg(short, long)]
        location: Option<String>,
    },

    /// Enhance every pending video in a directory, resumably
    Batch {
        /// Directory to scan for videos
        input_dir: PathBuf,

        /// Directory for enhanced outputs (default: next to each input)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Location tag to embed in every output
        #[arg(short, long)]
        location: Option<String>,

        /// Comma-separated extensions to pick up (default: common video formats)
        #[arg(long, value_delimiter = ',')]
        extensions: Option<Vec<String>>,

        /// Halt at the first failure instead of recording it and continuing
        #[arg(long)]
        no_skip_errors: bool,

        /// Handle at most this many files this run
        #[arg(long)]
        batch_size: Option<usize>,

        /// Worker threads (0 means one per CPU core)
        #[arg(long, default_value_t = 1)]
        workers: usize,
    },

    /// Forget recorded batch progress for a directory
    Reset {
        /// Directory holding the progress ledger
        dir: PathBuf,
    },
}

fn init_logging(debug: bool) {
    let default_filter = if debug { "camstamp=debug" } else { "camstamp=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match cli.command {
        Command::Single {
            input,
            output,
            location,
        } => run_single(input, output, location, cli.debug),
        Command::Batch {
            input_dir,
            output_dir,
            location,
            extensions,
            no_skip_errors,
            batch_size,
            workers,
        } => {
            let mut options = BatchOptions::new(input_dir);
            options.output_dir = output_dir;
            options.location = location;
            if let Some(exts) = extensions {
                options.extensions = exts.iter().map(|e| e.to_ascii_lowercase()).collect();
            }
            options.skip_errors = !no_skip_errors;
            options.batch_size = batch_size;
            options.workers = workers;
            options.debug = cli.debug;
            run_batch_command(options)
        }
        Command::Reset { dir } => {
            ProgressStore::reset(&dir)?;
            eprintln!("Progress cleared for {}", dir.display());
            Ok(())
        }
    }
}

fn run_single(
    input: PathBuf,
    output: Option<PathBuf>,
    location: Option<String>,
    debug: bool,
) -> Result<()> {
    let mut task = VideoTask::new(input);
    task.output_path = output;
    task.location = location;
    task.debug = debug;

    let pipeline = default_pipeline();
    match pipeline.process(&task) {
        ProcessingOutcome::Success { output, timestamp } => {
            eprintln!(
                "Done! {} (recording time {})",
                output.display(),
                timestamp.to_rfc3339()
            );
            Ok(())
        }
        ProcessingOutcome::Skipped { reason } => {
            eprintln!("Skipped: {reason}");
            Ok(())
        }
        ProcessingOutcome::Failed { message, .. } => bail!(message),
    }
}

fn run_batch_command(options: BatchOptions) -> Result<()> {
    let t_total = std::time::Instant::now();

    let token = CancellationToken::new();
    {
        let token = token.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nInterrupt received, stopping after the current file...");
            token.cancel();
        })
        .context("cannot install interrupt handler")?;
    }

    // Progress lives beside the outputs when an output directory is given,
    // otherwise beside the inputs.
    let ledger_dir = options
        .output_dir
        .clone()
        .unwrap_or_else(|| options.input_dir.clone());
    let store = ProgressStore::open(&ledger_dir)?;

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
            .context("invalid progress template")?,
    );
    let bar_cb = bar.clone();
    let raw_cb = move |current: usize, total: usize, name: &str| {
        if bar_cb.length() != Some(total as u64) {
            bar_cb.set_length(total as u64);
        }
        bar_cb.set_position(current as u64);
        bar_cb.set_message(name.to_string());
    };
    let raw: &ProgressCallback = &raw_cb;
    let throttled = ThrottledProgress::new(raw);
    let progress_cb = move |current: usize, total: usize, name: &str| {
        throttled.report(current, total, name);
    };
    let progress: &ProgressCallback = &progress_cb;

    let pipeline = default_pipeline();
    let report = run_batch(&pipeline, &store, &options, &token, Some(progress));
    bar.finish_and_clear();
    let report = report?;

    eprintln!(
        "Done! {} processed, {} failed, {} already done, {} remaining ({:.2}s){}",
        report.processed,
        report.failed,
        report.skipped,
        report.remaining,
        t_total.elapsed().as_secs_f64(),
        if report.cancelled { " [interrupted]" } else { "" }
    );

    if report.cancelled {
        eprintln!("Run the same command again to resume.");
    }
    Ok(())
}
