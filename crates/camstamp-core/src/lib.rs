pub mod batch;
pub mod crop;
pub mod embed;
pub mod error;
pub mod frame;
pub mod ledger;
pub mod ocr;
pub mod output_path;
pub mod pipeline;
pub mod timestamp;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use batch::{run_batch, BatchOptions, BatchReport};
pub use error::{EnhanceError, ErrorKind};
pub use ledger::{LedgerStatus, ProgressStore, LEDGER_FILENAME, SUMMARY_FILENAME};
pub use pipeline::{EnhancerPipeline, VideoPipeline};

/// One video to enhance, with its per-file settings.
#[derive(Debug, Clone)]
pub struct VideoTask {
    pub input_path: PathBuf,
    /// Explicit destination file; overrides `output_dir` and the naming rule.
    pub output_path: Option<PathBuf>,
    /// Directory to place the derived output name in.
    pub output_dir: Option<PathBuf>,
    pub location: Option<String>,
    /// Write a metadata sidecar next to the output.
    pub debug: bool,
}

impl VideoTask {
    pub fn new(input_path: PathBuf) -> Self {
        Self {
            input_path,
            output_path: None,
            output_dir: None,
            location: None,
            debug: false,
        }
    }
}

/// Terminal result of running the pipeline on one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProcessingOutcome {
    Success {
        output: PathBuf,
        timestamp: DateTime<Utc>,
    },
    Skipped {
        reason: String,
    },
    Failed {
        kind: ErrorKind,
        message: String,
    },
}

/// Cooperative cancellation flag, checked at file boundaries. Cancelling is
/// one-way; a token is never re-armed.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Type alias for progress callback: (current, total, file name).
pub type ProgressCallback<'a> = dyn Fn(usize, usize, &str) + Send + Sync + 'a;

/// Throttled progress reporter: emits at most every 200ms or on completion.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback<'a>,
    last_emit: std::sync::Mutex<Instant>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback<'a>) -> Self {
        Self {
            inner,
            last_emit: std::sync::Mutex::new(Instant::now() - std::time::Duration::from_secs(1)),
        }
    }

    pub fn report(&self, current: usize, total: usize, name: &str) {
        let is_done = current >= total;
        if !is_done {
            let mut last = self.last_emit.lock().unwrap_or_else(|e| e.into_inner());
            if last.elapsed().as_millis() < 200 {
                return;
            }
            *last = Instant::now();
        }
        (self.inner)(current, total, name);
    }
}

/// Production pipeline wired to the external ffmpeg and tesseract tools.
pub fn default_pipeline() -> EnhancerPipeline {
    EnhancerPipeline::new(
        Box::new(frame::FfmpegFrameSampler::new()),
        Arc::new(ocr::TesseractOcr::new()),
        Box::new(embed::FfmpegEmbedder::new()),
    )
}
