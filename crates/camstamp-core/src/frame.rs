use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::error::EnhanceError;

/// Video extensions the sampler will accept.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "wmv", "flv", "webm"];

/// One decoded frame, RGB8, row-major.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self { width, height, data }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Sub-rectangle anchored at the top-left corner.
    pub fn crop_top_left(&self, crop_width: u32, crop_height: u32) -> Frame {
        let cw = crop_width.min(self.width) as usize;
        let ch = crop_height.min(self.height) as usize;
        let stride = self.width as usize * 3;

        let mut data = Vec::with_capacity(cw * ch * 3);
        for row in 0..ch {
            let start = row * stride;
            data.extend_from_slice(&self.data[start..start + cw * 3]);
        }
        Frame::new(cw as u32, ch as u32, data)
    }
}

/// Pulls one representative frame from a video source.
pub trait FrameSampler: Send + Sync {
    fn sample(&self, video_path: &Path) -> Result<Frame, EnhanceError>;
}

/// ffmpeg-backed sampler: decodes the first frame to a staging PNG, then
/// loads it. The staging file is deleted when the handle drops, on every
/// exit path.
#[derive(Debug, Default)]
pub struct FfmpegFrameSampler;

impl FfmpegFrameSampler {
    pub fn new() -> Self {
        Self
    }
}

impl FrameSampler for FfmpegFrameSampler {
    fn sample(&self, video_path: &Path) -> Result<Frame, EnhanceError> {
        validate_video_file(video_path)?;

        let staging = tempfile::Builder::new()
            .prefix("camstamp-frame-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| EnhanceError::VideoRead(format!("cannot create staging file: {e}")))?;

        let output = Command::new("ffmpeg")
            .arg("-y")
            .arg("-i")
            .arg(video_path)
            .args(["-frames:v", "1", "-f", "image2"])
            .arg(staging.path())
            .output()
            .map_err(|e| EnhanceError::VideoRead(format!("cannot launch ffmpeg: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EnhanceError::VideoRead(format!(
                "ffmpeg could not decode {}: {}",
                video_path.display(),
                last_line(&stderr)
            )));
        }

        let decoded = image::open(staging.path())
            .map_err(|e| {
                EnhanceError::VideoRead(format!("video yielded no decodable frame: {e}"))
            })?
            .into_rgb8();

        let (width, height) = decoded.dimensions();
        if width == 0 || height == 0 {
            return Err(EnhanceError::VideoRead(format!(
                "video yielded a degenerate frame: {}",
                video_path.display()
            )));
        }

        debug!(width, height, path = %video_path.display(), "first frame extracted");
        Ok(Frame::new(width, height, decoded.into_raw()))
    }
}

/// Reject inputs that cannot possibly decode before spawning ffmpeg.
pub fn validate_video_file(path: &Path) -> Result<(), EnhanceError> {
    let meta = std::fs::metadata(path)
        .map_err(|_| EnhanceError::VideoRead(format!("file not found: {}", path.display())))?;
    if meta.len() == 0 {
        return Err(EnhanceError::VideoRead(format!(
            "file is empty: {}",
            path.display()
        )));
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(EnhanceError::VideoRead(format!(
            "unsupported video format .{ext}: {}",
            path.display()
        )));
    }
    Ok(())
}

fn last_line(s: &str) -> &str {
    s.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_crop_top_left() {
        // 4x4 frame, pixel value encodes its position
        let mut data = Vec::new();
        for i in 0..16u8 {
            data.extend_from_slice(&[i, i, i]);
        }
        let frame = Frame::new(4, 4, data);

        let cropped = frame.crop_top_left(2, 2);
        assert_eq!(cropped.width, 2);
        assert_eq!(cropped.height, 2);
        // Rows 0 and 1, columns 0 and 1
        assert_eq!(cropped.data[0], 0);
        assert_eq!(cropped.data[3], 1);
        assert_eq!(cropped.data[6], 4);
        assert_eq!(cropped.data[9], 5);
    }

    #[test]
    fn test_crop_clamps_to_frame() {
        let frame = Frame::new(2, 2, vec![0; 2 * 2 * 3]);
        let cropped = frame.crop_top_left(10, 10);
        assert_eq!(cropped.width, 2);
        assert_eq!(cropped.height, 2);
    }

    #[test]
    fn test_validate_missing_file() {
        let err = validate_video_file(Path::new("/no/such/video.mp4")).unwrap_err();
        assert!(matches!(err, EnhanceError::VideoRead(_)));
    }

    #[test]
    fn test_validate_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.mp4");
        std::fs::File::create(&path).unwrap();
        let err = validate_video_file(&path).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_validate_unsupported_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"hello")
            .unwrap();
        let err = validate_video_file(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported"));
    }
}
