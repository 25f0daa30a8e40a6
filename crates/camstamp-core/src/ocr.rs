use std::process::Command;

use tracing::debug;

use crate::error::EnhanceError;
use crate::frame::Frame;

/// One text candidate reported by the recognition capability.
#[derive(Debug, Clone)]
pub struct DetectedText {
    pub text: String,
    /// Recognition confidence in [0, 1].
    pub confidence: f32,
}

/// Narrow seam over the external text-recognition capability.
///
/// The engine is expensive to initialize and is constructed once per process,
/// then shared read-only across a whole batch run.
pub trait OcrEngine: Send + Sync {
    /// One recognition pass over a cropped frame. Candidates are returned
    /// highest confidence first; an empty list is a valid result.
    fn detect(&self, region: &Frame) -> Result<Vec<DetectedText>, EnhanceError>;
}

/// Tesseract-backed engine, invoked as a subprocess in TSV output mode.
pub struct TesseractOcr {
    lang: String,
}

impl TesseractOcr {
    pub fn new() -> Self {
        Self {
            lang: "eng".to_string(),
        }
    }

    pub fn with_lang(lang: &str) -> Self {
        Self {
            lang: lang.to_string(),
        }
    }
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self::new()
    }
}

impl OcrEngine for TesseractOcr {
    fn detect(&self, region: &Frame) -> Result<Vec<DetectedText>, EnhanceError> {
        let staging = tempfile::Builder::new()
            .prefix("camstamp-ocr-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| {
                EnhanceError::TimestampNotFound(format!("cannot create staging file: {e}"))
            })?;

        let img = image::RgbImage::from_raw(region.width, region.height, region.data.clone())
            .ok_or_else(|| {
                EnhanceError::TimestampNotFound("frame buffer has inconsistent size".to_string())
            })?;
        img.save(staging.path()).map_err(|e| {
            EnhanceError::TimestampNotFound(format!("cannot write staging image: {e}"))
        })?;

        let output = Command::new("tesseract")
            .arg(staging.path())
            .arg("stdout")
            .args(["-l", &self.lang, "--psm", "6", "tsv"])
            .output()
            .map_err(|e| EnhanceError::TimestampNotFound(format!("cannot launch tesseract: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EnhanceError::TimestampNotFound(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let candidates = parse_tsv(&String::from_utf8_lossy(&output.stdout));
        debug!(count = candidates.len(), "ocr candidates detected");
        for c in &candidates {
            debug!(text = %c.text, confidence = c.confidence, "ocr candidate");
        }
        Ok(candidates)
    }
}

/// Parse tesseract TSV output into per-line candidates.
///
/// Words are grouped by (page, block, paragraph, line); the line confidence
/// is the mean of its word confidences, scaled to [0, 1].
fn parse_tsv(tsv: &str) -> Vec<DetectedText> {
    let mut lines: Vec<((u32, u32, u32, u32), Vec<String>, f32, u32)> = Vec::new();

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 {
            continue;
        }
        // Level 5 rows are words; lower levels carry no text.
        if cols[0] != "5" {
            continue;
        }
        let conf: f32 = match cols[10].parse() {
            Ok(c) if c >= 0.0 => c,
            _ => continue,
        };
        let word = cols[11].trim();
        if word.is_empty() {
            continue;
        }

        let key = (
            cols[1].parse().unwrap_or(0),
            cols[2].parse().unwrap_or(0),
            cols[3].parse().unwrap_or(0),
            cols[4].parse().unwrap_or(0),
        );

        match lines.last_mut() {
            Some((last_key, words, conf_sum, count)) if *last_key == key => {
                words.push(word.to_string());
                *conf_sum += conf;
                *count += 1;
            }
            _ => lines.push((key, vec![word.to_string()], conf, 1)),
        }
    }

    let mut candidates: Vec<DetectedText> = lines
        .into_iter()
        .map(|(_, words, conf_sum, count)| DetectedText {
            text: words.join(" "),
            confidence: conf_sum / count as f32 / 100.0,
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates
}

/// Scripted engine for tests: returns a fixed candidate list.
#[cfg(test)]
pub struct ScriptedOcr {
    pub candidates: Vec<DetectedText>,
}

#[cfg(test)]
impl OcrEngine for ScriptedOcr {
    fn detect(&self, _region: &Frame) -> Result<Vec<DetectedText>, EnhanceError> {
        Ok(self.candidates.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    #[test]
    fn test_parse_tsv_groups_words_into_lines() {
        let tsv = format!(
            "{HEADER}\n\
             1\t1\t0\t0\t0\t0\t0\t0\t100\t40\t-1\t\n\
             5\t1\t1\t1\t1\t1\t0\t0\t20\t10\t90\t@\n\
             5\t1\t1\t1\t1\t2\t22\t0\t40\t10\t80\t2025/05/28\n\
             5\t1\t1\t1\t1\t3\t64\t0\t40\t10\t70\t19.41.14\n\
             5\t1\t1\t1\t2\t1\t0\t12\t30\t10\t30\tnoise\n"
        );
        let candidates = parse_tsv(&tsv);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].text, "@ 2025/05/28 19.41.14");
        assert!((candidates[0].confidence - 0.80).abs() < 1e-6);
        assert_eq!(candidates[1].text, "noise");
    }

    #[test]
    fn test_parse_tsv_orders_by_confidence() {
        let tsv = format!(
            "{HEADER}\n\
             5\t1\t1\t1\t1\t1\t0\t0\t20\t10\t40\tlow\n\
             5\t1\t2\t1\t1\t1\t0\t20\t20\t10\t95\thigh\n"
        );
        let candidates = parse_tsv(&tsv);
        assert_eq!(candidates[0].text, "high");
        assert_eq!(candidates[1].text, "low");
    }

    #[test]
    fn test_parse_tsv_skips_negative_confidence_rows() {
        let tsv = format!("{HEADER}\n5\t1\t1\t1\t1\t1\t0\t0\t20\t10\t-1\tghost\n");
        assert!(parse_tsv(&tsv).is_empty());
    }

    #[test]
    fn test_parse_tsv_empty_output_is_valid() {
        assert!(parse_tsv(HEADER).is_empty());
        assert!(parse_tsv("").is_empty());
    }
}
