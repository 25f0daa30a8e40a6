use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::EnhanceError;
use crate::timestamp::NormalizedTimestamp;

/// Value written into the container's encoder tag.
pub const ENCODER_TAG: &str = "camstamp";

/// Narrow seam over the external media-metadata capability.
pub trait MetadataEmbedder: Send + Sync {
    /// Produce a copy of `input` at `output` with creation-time metadata set
    /// to the normalized instant and, if given, a location tag. On failure no
    /// partial output file may remain.
    fn embed(
        &self,
        input: &Path,
        output: &Path,
        timestamp: &NormalizedTimestamp,
        location: Option<&str>,
    ) -> Result<(), EnhanceError>;
}

/// ffmpeg-backed embedder: streams are copied untouched, only container
/// metadata changes. Writes to a temporary sibling and renames on success so
/// a crash never leaves a half-written output at the final path.
#[derive(Debug, Default)]
pub struct FfmpegEmbedder;

impl FfmpegEmbedder {
    pub fn new() -> Self {
        Self
    }
}

impl MetadataEmbedder for FfmpegEmbedder {
    fn embed(
        &self,
        input: &Path,
        output: &Path,
        timestamp: &NormalizedTimestamp,
        location: Option<&str>,
    ) -> Result<(), EnhanceError> {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| EnhanceError::Path(format!("cannot create output directory: {e}")))?;
        }

        let temp = temp_sibling(output);
        let args = build_ffmpeg_args(input, &temp, timestamp, location);
        debug!(output = %output.display(), "embedding metadata via ffmpeg");

        let result = Command::new("ffmpeg").args(&args).output();
        let failure = match result {
            Err(e) => Some(format!("cannot launch ffmpeg: {e}")),
            Ok(out) if !out.status.success() => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                Some(format!(
                    "ffmpeg exited with {}: {}",
                    out.status,
                    stderr.lines().last().unwrap_or("").trim()
                ))
            }
            Ok(_) => match fs::metadata(&temp) {
                Ok(meta) if meta.len() > 0 => None,
                _ => Some("ffmpeg produced no usable output".to_string()),
            },
        };

        if let Some(message) = failure {
            if fs::remove_file(&temp).is_err() {
                debug!(temp = %temp.display(), "no partial output to clean up");
            }
            return Err(EnhanceError::MetadataEmbed(message));
        }

        fs::rename(&temp, output).map_err(|e| {
            let _ = fs::remove_file(&temp);
            EnhanceError::MetadataEmbed(format!("cannot move output into place: {e}"))
        })?;

        // Align the file's mtime with the recovered recording time so file
        // browsers sort the output correctly.
        let ft = filetime::FileTime::from_unix_time(timestamp.unix_seconds(), 0);
        if let Err(e) = filetime::set_file_mtime(output, ft) {
            warn!(error = %e, "could not set output mtime");
        }

        Ok(())
    }
}

/// Temporary sibling path that keeps the container extension so ffmpeg can
/// pick the muxer from it.
fn temp_sibling(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let name = match output.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!(".{stem}.part.{ext}"),
        None => format!(".{stem}.part"),
    };
    output.with_file_name(name)
}

fn build_ffmpeg_args(
    input: &Path,
    temp_output: &Path,
    timestamp: &NormalizedTimestamp,
    location: Option<&str>,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-y".into(),
        "-i".into(),
        input.into(),
        "-map".into(),
        "0".into(),
        "-c".into(),
        "copy".into(),
        "-metadata".into(),
        format!("creation_time={}", timestamp.to_creation_time()).into(),
        "-metadata".into(),
        format!("encoder={ENCODER_TAG}").into(),
    ];
    if let Some(loc) = location {
        let sanitized = sanitize_tag_value(loc);
        if !sanitized.is_empty() {
            args.push("-metadata".into());
            args.push(format!("location={sanitized}").into());
        }
    }
    args.push(temp_output.into());
    args
}

/// Strip control characters and cap the UTF-8 byte length at 255, the
/// container tag limit.
pub fn sanitize_tag_value(value: &str) -> String {
    let mut cleaned: String = value
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\t'))
        .collect();
    if cleaned.len() > 255 {
        let mut end = 252;
        while !cleaned.is_char_boundary(end) {
            end -= 1;
        }
        cleaned.truncate(end);
        cleaned.push_str("...");
    }
    cleaned
}

/// Sidecar record of what was embedded, written next to the output in
/// debug mode.
#[derive(Debug, Serialize, Deserialize)]
pub struct MetadataSidecar {
    pub creation_time: String,
    pub location: Option<String>,
    pub encoder: String,
    pub exported_at: chrono::DateTime<chrono::Utc>,
}

impl MetadataSidecar {
    pub fn new(timestamp: &NormalizedTimestamp, location: Option<&str>) -> Self {
        Self {
            creation_time: timestamp.to_creation_time(),
            location: location.map(sanitize_tag_value),
            encoder: ENCODER_TAG.to_string(),
            exported_at: chrono::Utc::now(),
        }
    }

    /// Write `<output>.metadata.json` beside the embedded video.
    pub fn export(&self, output: &Path) -> Result<PathBuf, EnhanceError> {
        let mut name = output.file_name().unwrap_or_default().to_os_string();
        name.push(".metadata.json");
        let path = output.with_file_name(name);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| EnhanceError::MetadataEmbed(format!("cannot serialize sidecar: {e}")))?;
        fs::write(&path, json)
            .map_err(|e| EnhanceError::MetadataEmbed(format!("cannot write sidecar: {e}")))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn ts() -> NormalizedTimestamp {
        NormalizedTimestamp(
            DateTime::parse_from_rfc3339("2025-05-28T10:41:14Z")
                .unwrap()
                .with_timezone(&Utc),
        )
    }

    #[test]
    fn test_ffmpeg_args_creation_time_and_copy() {
        let args = build_ffmpeg_args(
            Path::new("/in/a.mp4"),
            Path::new("/out/.a_enhanced.part.mp4"),
            &ts(),
            None,
        );
        let rendered: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(rendered.contains(&"creation_time=2025-05-28T10:41:14.000000Z".to_string()));
        assert!(rendered.contains(&"copy".to_string()));
        assert!(!rendered.iter().any(|a| a.starts_with("location=")));
        assert_eq!(rendered.last().unwrap(), "/out/.a_enhanced.part.mp4");
    }

    #[test]
    fn test_ffmpeg_args_include_location() {
        let args = build_ffmpeg_args(
            Path::new("/in/a.mp4"),
            Path::new("/out/.a.part.mp4"),
            &ts(),
            Some("living room"),
        );
        assert!(args
            .iter()
            .any(|a| a.to_string_lossy() == "location=living room"));
    }

    #[test]
    fn test_temp_sibling_keeps_extension() {
        let temp = temp_sibling(Path::new("/out/video_enhanced.mp4"));
        assert_eq!(temp, Path::new("/out/.video_enhanced.part.mp4"));
    }

    #[test]
    fn test_sanitize_strips_control_chars() {
        assert_eq!(sanitize_tag_value("liv\u{0}ing\nroom"), "livingroom");
    }

    #[test]
    fn test_sanitize_caps_byte_length() {
        let long = "x".repeat(300);
        let out = sanitize_tag_value(&long);
        assert!(out.len() <= 255);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_sidecar_export() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("video_enhanced.mp4");
        let sidecar = MetadataSidecar::new(&ts(), Some("garage"));
        let path = sidecar.export(&output).unwrap();
        assert_eq!(path, dir.path().join("video_enhanced.mp4.metadata.json"));

        let loaded: MetadataSidecar =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.creation_time, "2025-05-28T10:41:14.000000Z");
        assert_eq!(loaded.location.as_deref(), Some("garage"));
    }
}
