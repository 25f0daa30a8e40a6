use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use tracing::debug;

use crate::error::EnhanceError;
use crate::ocr::DetectedText;

/// Candidates at or above this confidence are accepted on the first
/// pattern match.
pub const PRIMARY_CONFIDENCE: f32 = 0.6;

/// Lower bound for the fallback tier: pattern-shaped text below the primary
/// threshold is still accepted down to here. Deliberately permissive;
/// re-validate against real camera samples before changing.
pub const FALLBACK_CONFIDENCE: f32 = 0.3;

/// Fixed offset the camera's on-screen clock is assumed to display (JST).
pub const SOURCE_OFFSET_SECS: i64 = 9 * 3600;

// Slash or dash date separators, colon or dot time separators, optional
// leading marker glyph the camera overlays before the date.
static RE_0: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@?\s*(\d{4})[-/](\d{1,2})[-/](\d{1,2})\s+(\d{1,2})[:.](\d{2})[:.](\d{2})").unwrap()
});
static RE_1: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@?\s*(\d{4})[-/](\d{1,2})[-/](\d{1,2})\s+(\d{1,2}):(\d{2}):(\d{2})").unwrap()
});
static RE_2: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@?\s*(\d{4})(\d{2})(\d{2})\s+(\d{1,2}):(\d{2}):(\d{2})").unwrap()
});

static PATTERNS: &[&LazyLock<Regex>] = &[&RE_0, &RE_1, &RE_2];

/// Structured local time recovered from an OCR candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTimestamp {
    pub local: NaiveDateTime,
    /// Confidence of the candidate the match came from.
    pub confidence: f32,
    /// Index into the pattern table that matched.
    pub pattern_index: usize,
}

impl ParsedTimestamp {
    /// Build from captured fields, failing on out-of-range calendar values.
    fn from_fields(
        fields: [u32; 6],
        confidence: f32,
        pattern_index: usize,
    ) -> Option<ParsedTimestamp> {
        let [year, month, day, hour, minute, second] = fields;
        let local = NaiveDate::from_ymd_opt(year as i32, month, day)?
            .and_hms_opt(hour, minute, second)?;
        Some(ParsedTimestamp {
            local,
            confidence,
            pattern_index,
        })
    }
}

/// Absolute instant derived from a parsed local time under the fixed
/// source offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedTimestamp(pub DateTime<Utc>);

impl NormalizedTimestamp {
    /// Creation-time value in the form the container metadata expects.
    pub fn to_creation_time(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%S.000000Z").to_string()
    }

    pub fn unix_seconds(&self) -> i64 {
        self.0.timestamp()
    }
}

/// Convert a parsed local time (fixed +9:00 offset) to UTC.
pub fn normalize(parsed: &ParsedTimestamp) -> NormalizedTimestamp {
    let utc = (parsed.local - Duration::seconds(SOURCE_OFFSET_SECS)).and_utc();
    NormalizedTimestamp(utc)
}

/// Pick the best timestamp from OCR candidates under the two-tier
/// confidence policy.
///
/// Primary tier: the first (highest-confidence) pattern match at or above
/// `PRIMARY_CONFIDENCE`. Fallback tier: failing that, the first match at or
/// above `FALLBACK_CONFIDENCE`. Text that matches a pattern but fails
/// calendar validation is treated as not found, never as a hard error.
pub fn parse_candidates(candidates: &[DetectedText]) -> Result<ParsedTimestamp, EnhanceError> {
    let mut ordered: Vec<&DetectedText> = candidates.iter().collect();
    ordered.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut fallback: Option<ParsedTimestamp> = None;

    for candidate in &ordered {
        if candidate.confidence < FALLBACK_CONFIDENCE {
            break;
        }
        let Some(parsed) = match_patterns(&candidate.text, candidate.confidence) else {
            continue;
        };

        if candidate.confidence >= PRIMARY_CONFIDENCE {
            debug!(
                text = %candidate.text,
                confidence = candidate.confidence,
                pattern = parsed.pattern_index,
                "timestamp accepted (primary tier)"
            );
            return Ok(parsed);
        }
        if fallback.is_none() {
            fallback = Some(parsed);
        }
    }

    if let Some(parsed) = fallback {
        debug!(
            confidence = parsed.confidence,
            pattern = parsed.pattern_index,
            "timestamp accepted (fallback tier)"
        );
        return Ok(parsed);
    }

    Err(EnhanceError::TimestampNotFound(format!(
        "no candidate matched a timestamp pattern ({} candidates)",
        candidates.len()
    )))
}

/// Try each pattern in order against one candidate string.
fn match_patterns(text: &str, confidence: f32) -> Option<ParsedTimestamp> {
    for (index, pattern) in PATTERNS.iter().enumerate() {
        let Some(caps) = pattern.captures(text) else {
            continue;
        };
        let mut fields = [0u32; 6];
        let mut ok = true;
        for (i, field) in fields.iter_mut().enumerate() {
            match caps.get(i + 1).and_then(|m| m.as_str().parse().ok()) {
                Some(v) => *field = v,
                None => {
                    ok = false;
                    break;
                }
            }
        }
        if !ok {
            continue;
        }
        // Day 32 or hour 25 falls through to the next pattern, and
        // ultimately to "not found".
        if let Some(parsed) = ParsedTimestamp::from_fields(fields, confidence, index) {
            return Some(parsed);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(text: &str, confidence: f32) -> DetectedText {
        DetectedText {
            text: text.to_string(),
            confidence,
        }
    }

    fn fields(p: &ParsedTimestamp) -> (i32, u32, u32, u32, u32, u32) {
        use chrono::{Datelike, Timelike};
        (
            p.local.year(),
            p.local.month(),
            p.local.day(),
            p.local.hour(),
            p.local.minute(),
            p.local.second(),
        )
    }

    #[test]
    fn test_supported_separator_combinations() {
        let cases = [
            "2025/05/28 19:41:14",   // slash date, colon time
            "2025/05/28 19.41.14",   // slash date, dot time
            "2025-05-28 19:41:14",   // dash date, colon time
            "20250528 19:41:14",     // compact date, colon time
            "@ 2025/05/28 19:41:14", // leading marker glyph
            "@ 2025/05/28 19.41.14",
            "@20250528 19:41:14",
        ];
        for text in cases {
            let parsed = parse_candidates(&[candidate(text, 0.9)]).unwrap();
            assert_eq!(fields(&parsed), (2025, 5, 28, 19, 41, 14), "case: {text}");
        }
    }

    #[test]
    fn test_single_digit_month_and_day() {
        let parsed = parse_candidates(&[candidate("2025/5/8 9:07:03", 0.9)]).unwrap();
        assert_eq!(fields(&parsed), (2025, 5, 8, 9, 7, 3));
    }

    #[test]
    fn test_primary_tier_beats_preceding_noise() {
        let parsed = parse_candidates(&[
            candidate("garbled noise", 0.4),
            candidate("2025/05/28 19:41:14", 0.75),
        ])
        .unwrap();
        assert_eq!(parsed.confidence, 0.75);
    }

    #[test]
    fn test_below_fallback_rejected_even_if_pattern_shaped() {
        let err = parse_candidates(&[candidate("2025/05/28 19:41:14", 0.2)]).unwrap_err();
        assert!(matches!(err, EnhanceError::TimestampNotFound(_)));
    }

    #[test]
    fn test_fallback_tier_accepts_low_confidence_match() {
        let parsed = parse_candidates(&[
            candidate("not a timestamp", 0.9),
            candidate("2025/05/28 19:41:14", 0.35),
        ])
        .unwrap();
        assert_eq!(fields(&parsed).0, 2025);
        assert_eq!(parsed.confidence, 0.35);
    }

    #[test]
    fn test_primary_preferred_over_earlier_fallback() {
        let parsed = parse_candidates(&[
            candidate("2024/01/01 00:00:00", 0.45),
            candidate("2025/05/28 19:41:14", 0.65),
        ])
        .unwrap();
        assert_eq!(fields(&parsed), (2025, 5, 28, 19, 41, 14));
    }

    #[test]
    fn test_calendar_validation_rejects_impossible_dates() {
        let err = parse_candidates(&[candidate("2025/13/32 25:61:61", 0.9)]).unwrap_err();
        assert!(matches!(err, EnhanceError::TimestampNotFound(_)));
    }

    #[test]
    fn test_empty_candidates() {
        assert!(parse_candidates(&[]).is_err());
    }

    #[test]
    fn test_normalize_jst_to_utc() {
        let parsed = parse_candidates(&[candidate("2025-05-28 19:41:14", 0.9)]).unwrap();
        let normalized = normalize(&parsed);
        assert_eq!(
            normalized.0,
            DateTime::parse_from_rfc3339("2025-05-28T10:41:14Z")
                .unwrap()
                .with_timezone(&Utc)
        );
    }

    #[test]
    fn test_creation_time_format() {
        let parsed = parse_candidates(&[candidate("2025/05/28 19.41.14", 0.78)]).unwrap();
        let normalized = normalize(&parsed);
        assert_eq!(normalized.to_creation_time(), "2025-05-28T10:41:14.000000Z");
    }

    #[test]
    fn test_midnight_crossing() {
        let parsed = parse_candidates(&[candidate("2025/01/01 08:59:59", 0.9)]).unwrap();
        let normalized = normalize(&parsed);
        assert_eq!(normalized.to_creation_time(), "2024-12-31T23:59:59.000000Z");
    }
}
