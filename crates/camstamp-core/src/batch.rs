use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::frame::SUPPORTED_EXTENSIONS;
use crate::ledger::{LedgerStatus, ProgressStore};
use crate::output_path;
use crate::pipeline::VideoPipeline;
use crate::{CancellationToken, ProcessingOutcome, ProgressCallback, VideoTask};

/// Settings for one batch run over a directory of videos.
pub struct BatchOptions {
    pub input_dir: PathBuf,
    pub output_dir: Option<PathBuf>,
    pub location: Option<String>,
    /// Lowercase extensions to pick up; defaults to the supported set.
    pub extensions: Vec<String>,
    /// When true a failed file is recorded and the run continues; when false
    /// the run halts at the first failure.
    pub skip_errors: bool,
    /// Upper bound on files handled this run; the rest stay pending.
    pub batch_size: Option<usize>,
    /// Worker threads; 0 means one per CPU core.
    pub workers: usize,
    pub debug: bool,
}

impl BatchOptions {
    pub fn new(input_dir: PathBuf) -> Self {
        Self {
            input_dir,
            output_dir: None,
            location: None,
            extensions: SUPPORTED_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            skip_errors: true,
            batch_size: None,
            workers: 1,
            debug: false,
        }
    }
}

/// What one batch run did, excluding progress replayed from the ledger.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: u64,
    pub failed: u64,
    /// Files excluded up front because the ledger already finalized them.
    pub skipped: u64,
    /// Eligible files left untouched by batch-size limit or cancellation.
    pub remaining: u64,
    pub cancelled: bool,
}

/// Run the pipeline over every pending video in the input directory.
///
/// Each file reaches at most one terminal outcome: the ledger is consulted
/// before processing and appended (then flushed) immediately after, so an
/// interrupt between files loses nothing and an interrupt mid-file only
/// repeats that file on the next run.
pub fn run_batch(
    pipeline: &dyn VideoPipeline,
    store: &ProgressStore,
    options: &BatchOptions,
    token: &CancellationToken,
    progress: Option<&ProgressCallback>,
) -> Result<BatchReport> {
    let all = enumerate_videos(options)?;
    let (pending, skipped): (Vec<_>, Vec<_>) =
        all.into_iter().partition(|p| !store.is_finalized(p));
    let skipped = skipped.len() as u64;

    let limit = options.batch_size.unwrap_or(pending.len()).min(pending.len());
    let deferred = (pending.len() - limit) as u64;
    let selected = &pending[..limit];

    info!(
        total = selected.len(),
        skipped, deferred, "starting batch run"
    );

    let processed = AtomicU64::new(0);
    let failed = AtomicU64::new(0);
    let done = AtomicU64::new(0);

    let handle_file = |path: &PathBuf| -> Result<()> {
        let mut task = VideoTask::new(path.clone());
        task.output_dir = options.output_dir.clone();
        task.location = options.location.clone();
        task.debug = options.debug;

        let outcome = pipeline.process(&task);
        let status = match &outcome {
            ProcessingOutcome::Success { output, .. } => {
                info!(input = %path.display(), output = %output.display(), "processed");
                Some(LedgerStatus::Processed)
            }
            ProcessingOutcome::Skipped { reason } => {
                info!(input = %path.display(), reason = %reason, "skipped");
                None
            }
            ProcessingOutcome::Failed { kind, message } => {
                warn!(input = %path.display(), kind = %kind, message = %message, "failed");
                Some(LedgerStatus::Failed)
            }
        };

        let current = done.fetch_add(1, Ordering::Relaxed) + 1;
        let remaining = deferred + (selected.len() - current as usize) as u64;

        if let Some(status) = status {
            store.record(path, status)?;
            store
                .write_summary(selected.len(), remaining, options.location.as_deref())
                .context("cannot update batch summary")?;
            match status {
                LedgerStatus::Processed => processed.fetch_add(1, Ordering::Relaxed),
                LedgerStatus::Failed => failed.fetch_add(1, Ordering::Relaxed),
            };
        }

        if let Some(cb) = progress {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            cb(current as usize, selected.len(), &name);
        }

        if !options.skip_errors {
            if let ProcessingOutcome::Failed { message, .. } = &outcome {
                bail!("halting on failure at {}: {message}", path.display());
            }
        }
        Ok(())
    };

    // Halt-on-first-error needs a deterministic processing order, so it
    // always runs on one worker.
    let workers = if !options.skip_errors {
        1
    } else if options.workers == 0 {
        rayon::current_num_threads()
    } else {
        options.workers
    };

    if workers == 1 || selected.len() < 2 {
        for (index, path) in selected.iter().enumerate() {
            if token.is_cancelled() {
                warn!(pending = selected.len() - index, "batch cancelled");
                break;
            }
            handle_file(path)?;
        }
    } else {
        let chunk_size = selected.len().div_ceil(workers).max(1);
        let handle_file = &handle_file;
        std::thread::scope(|scope| {
            for chunk in selected.chunks(chunk_size) {
                scope.spawn(move || {
                    for path in chunk {
                        if token.is_cancelled() {
                            break;
                        }
                        // skip_errors is true on this branch, so per-file
                        // ledger failures are the only errors to surface.
                        if let Err(e) = handle_file(path) {
                            warn!(error = %e, "worker stopping");
                            token.cancel();
                            break;
                        }
                    }
                });
            }
        });
    }

    let report = BatchReport {
        processed: processed.load(Ordering::Relaxed),
        failed: failed.load(Ordering::Relaxed),
        skipped,
        remaining: deferred + (selected.len() as u64 - done.load(Ordering::Relaxed)),
        cancelled: token.is_cancelled(),
    };
    info!(
        processed = report.processed,
        failed = report.failed,
        skipped = report.skipped,
        remaining = report.remaining,
        "batch run finished"
    );
    Ok(report)
}

/// Eligible videos in the input directory, sorted lexicographically by path.
fn enumerate_videos(options: &BatchOptions) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(&options.input_dir).with_context(|| {
        format!("cannot read input directory: {}", options.input_dir.display())
    })?;

    let mut videos = Vec::new();
    for entry in entries {
        let entry = entry.context("cannot read directory entry")?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if !options.extensions.iter().any(|allowed| allowed == &ext) {
            continue;
        }
        // Outputs of an earlier run land next to the inputs when no output
        // directory is set; never pick them up as fresh candidates.
        if output_path::is_enhanced_output(&path) {
            continue;
        }
        videos.push(path);
    }
    videos.sort();
    Ok(videos)
}
