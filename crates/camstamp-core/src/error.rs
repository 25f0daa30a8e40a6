use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can terminate the per-file pipeline.
#[derive(Debug, Error)]
pub enum EnhanceError {
    /// Source video cannot be opened, is empty, or yields no frames.
    #[error("failed to read video: {0}")]
    VideoRead(String),

    /// No OCR candidate matched a timestamp pattern at either confidence
    /// tier, or a matching candidate failed calendar validation.
    #[error("no on-screen timestamp found: {0}")]
    TimestampNotFound(String),

    /// The external embedding capability failed or produced no usable output.
    #[error("metadata embedding failed: {0}")]
    MetadataEmbed(String),

    /// Destination path cannot be derived or written.
    #[error("output path error: {0}")]
    Path(String),
}

impl EnhanceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EnhanceError::VideoRead(_) => ErrorKind::VideoRead,
            EnhanceError::TimestampNotFound(_) => ErrorKind::TimestampNotFound,
            EnhanceError::MetadataEmbed(_) => ErrorKind::MetadataEmbed,
            EnhanceError::Path(_) => ErrorKind::Path,
        }
    }
}

/// Tag of a pipeline failure, suitable for matching in batch aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    VideoRead,
    TimestampNotFound,
    MetadataEmbed,
    Path,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::VideoRead => "video-read",
            ErrorKind::TimestampNotFound => "timestamp-not-found",
            ErrorKind::MetadataEmbed => "metadata-embed",
            ErrorKind::Path => "path",
        };
        f.write_str(s)
    }
}
