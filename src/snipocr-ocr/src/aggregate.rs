//! Normalization of heterogeneous backend output

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a backend reported its confidence (0-100 scale)
#[derive(Debug, Clone, PartialEq)]
pub enum ConfidenceReport {
    /// One value for the whole result
    Aggregate(f64),
    /// One value per recognized token
    PerToken(Vec<f64>),
    /// Nothing reported
    Absent,
}

/// Unnormalized output of a backend
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecognition {
    pub text: String,
    pub confidence: ConfidenceReport,
}

/// Uniform result handed to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionResult {
    pub text: String,
    /// 0 to 100
    pub confidence: f64,
    pub duration_ms: u64,
}

impl ConfidenceReport {
    /// Collapse to a single value in [0, 100].
    ///
    /// Per-token reports use the arithmetic mean. Empty lists, non-finite
    /// means and absent reports all yield 0.
    pub fn resolve(&self) -> f64 {
        let value = match self {
            ConfidenceReport::Aggregate(v) => *v,
            ConfidenceReport::PerToken(values) if values.is_empty() => 0.0,
            ConfidenceReport::PerToken(values) => {
                values.iter().sum::<f64>() / values.len() as f64
            }
            ConfidenceReport::Absent => 0.0,
        };
        if value.is_finite() {
            value.clamp(0.0, 100.0)
        } else {
            0.0
        }
    }
}

/// Build the uniform result from raw backend output and the measured call time
pub fn normalize(raw: RawRecognition, elapsed: Duration, collapse_whitespace: bool) -> RecognitionResult {
    let trimmed = raw.text.trim();
    let text = if collapse_whitespace {
        trimmed.split_whitespace().collect::<String>()
    } else {
        trimmed.to_string()
    };

    RecognitionResult {
        text,
        confidence: raw.confidence.resolve(),
        duration_ms: (elapsed.as_secs_f64() * 1000.0).round() as u64,
    }
}

/// Pick the highest-confidence result; ties keep the earliest
pub fn most_confident<I>(results: I) -> Option<RecognitionResult>
where
    I: IntoIterator<Item = RecognitionResult>,
{
    results.into_iter().fold(None, |best, candidate| match best {
        Some(b) if b.confidence >= candidate.confidence => Some(b),
        _ => Some(candidate),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(text: &str, confidence: ConfidenceReport) -> RawRecognition {
        RawRecognition {
            text: text.to_string(),
            confidence,
        }
    }

    #[test]
    fn test_aggregate_used_directly() {
        assert_eq!(ConfidenceReport::Aggregate(87.5).resolve(), 87.5);
        assert_eq!(ConfidenceReport::Aggregate(140.0).resolve(), 100.0);
    }

    #[test]
    fn test_per_token_mean() {
        let report = ConfidenceReport::PerToken(vec![90.0, 80.0, 40.0]);
        assert_eq!(report.resolve(), 70.0);
    }

    #[test]
    fn test_fallbacks_to_zero() {
        assert_eq!(ConfidenceReport::PerToken(vec![]).resolve(), 0.0);
        assert_eq!(ConfidenceReport::PerToken(vec![f64::NAN, 50.0]).resolve(), 0.0);
        assert_eq!(ConfidenceReport::Aggregate(f64::INFINITY).resolve(), 0.0);
        assert_eq!(ConfidenceReport::Absent.resolve(), 0.0);
    }

    #[test]
    fn test_normalize_trims_and_rounds_duration() {
        let result = normalize(
            raw("  hello world \n", ConfidenceReport::Aggregate(91.0)),
            Duration::from_micros(12_600),
            false,
        );
        assert_eq!(result.text, "hello world");
        assert_eq!(result.confidence, 91.0);
        assert_eq!(result.duration_ms, 13);
    }

    #[test]
    fn test_normalize_collapses_whitespace_on_request() {
        let result = normalize(
            raw(" A7 K\t9 Q ", ConfidenceReport::Absent),
            Duration::from_millis(5),
            true,
        );
        assert_eq!(result.text, "A7K9Q");
        assert_eq!(result.duration_ms, 5);
    }

    #[test]
    fn test_most_confident() {
        let make = |text: &str, confidence| RecognitionResult {
            text: text.to_string(),
            confidence,
            duration_ms: 1,
        };

        let best = most_confident(vec![make("a", 40.0), make("b", 75.0), make("c", 75.0)]);
        assert_eq!(best.map(|r| r.text), Some("b".to_string()));
        assert!(most_confident(Vec::new()).is_none());
    }

    #[test]
    fn test_result_wire_shape() {
        let result = RecognitionResult {
            text: "x".to_string(),
            confidence: 50.0,
            duration_ms: 7,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["durationMs"], 7);
    }
}
