use std::sync::Arc;

use tracing::{debug, info};

use crate::crop;
use crate::embed::{MetadataEmbedder, MetadataSidecar};
use crate::error::EnhanceError;
use crate::frame::FrameSampler;
use crate::ocr::OcrEngine;
use crate::output_path;
use crate::timestamp;
use crate::{ProcessingOutcome, VideoTask};

/// One deterministic input -> output transformation for a single file.
///
/// Every stage runs exactly once per invocation; retry policy belongs to the
/// orchestrator. Any stage error terminates the run as `Failed(kind)`.
pub trait VideoPipeline: Send + Sync {
    fn process(&self, task: &VideoTask) -> ProcessingOutcome;
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    FrameExtracted,
    Cropped,
    TextDetected,
    TimestampParsed,
    TimestampNormalized,
    OutputResolved,
    MetadataEmbedded,
}

/// The production pipeline: frame sampling, region crop, text recognition,
/// timestamp parsing, normalization, path resolution, metadata embedding.
pub struct EnhancerPipeline {
    sampler: Box<dyn FrameSampler>,
    ocr: Arc<dyn OcrEngine>,
    embedder: Box<dyn MetadataEmbedder>,
}

impl EnhancerPipeline {
    pub fn new(
        sampler: Box<dyn FrameSampler>,
        ocr: Arc<dyn OcrEngine>,
        embedder: Box<dyn MetadataEmbedder>,
    ) -> Self {
        Self {
            sampler,
            ocr,
            embedder,
        }
    }

    fn run(&self, task: &VideoTask) -> Result<ProcessingOutcome, EnhanceError> {
        let mut stage = Stage::Start;

        let frame = self.sampler.sample(&task.input_path)?;
        stage = advance(stage, Stage::FrameExtracted);
        debug!(width = frame.width, height = frame.height, "frame shape");

        let region = crop::crop_timestamp_region(&frame)?;
        stage = advance(stage, Stage::Cropped);

        let candidates = self.ocr.detect(&region)?;
        stage = advance(stage, Stage::TextDetected);

        let parsed = timestamp::parse_candidates(&candidates)?;
        stage = advance(stage, Stage::TimestampParsed);
        debug!(
            local = %parsed.local,
            confidence = parsed.confidence,
            pattern = parsed.pattern_index,
            "timestamp parsed"
        );

        let normalized = timestamp::normalize(&parsed);
        stage = advance(stage, Stage::TimestampNormalized);

        let output = output_path::resolve_output_path(task)?;
        stage = advance(stage, Stage::OutputResolved);
        debug!(output = %output.display(), "output path resolved");

        // Derived paths are collision-free by construction; only an explicit
        // destination can point at an existing file. Never overwrite it.
        if output.exists() {
            return Ok(ProcessingOutcome::Skipped {
                reason: format!("output already exists: {}", output.display()),
            });
        }

        self.embedder
            .embed(&task.input_path, &output, &normalized, task.location.as_deref())?;
        advance(stage, Stage::MetadataEmbedded);

        if task.debug {
            let sidecar = MetadataSidecar::new(&normalized, task.location.as_deref());
            let path = sidecar.export(&output)?;
            debug!(sidecar = %path.display(), "metadata sidecar written");
        }

        info!(
            input = %task.input_path.display(),
            output = %output.display(),
            creation_time = %normalized.to_creation_time(),
            "video processed"
        );
        Ok(ProcessingOutcome::Success {
            output,
            timestamp: normalized.0,
        })
    }
}

fn advance(_from: Stage, to: Stage) -> Stage {
    debug!(stage = ?to, "stage complete");
    to
}

impl VideoPipeline for EnhancerPipeline {
    fn process(&self, task: &VideoTask) -> ProcessingOutcome {
        match self.run(task) {
            Ok(outcome) => outcome,
            Err(err) => ProcessingOutcome::Failed {
                kind: err.kind(),
                message: err.to_string(),
            },
        }
    }
}
