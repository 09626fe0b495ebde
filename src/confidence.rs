//! Confidence scoring for discovered grants.
//!
//! Confidence estimates how much of a listing the extractor recovered and
//! how far the source can be trusted:
//!
//! ```text
//! confidence = (present_fields / expected_fields) × source_weight
//! ```
//!
//! clamped to `[0, 1]`. The function is deterministic; there is no retry or
//! probabilistic modeling involved.

use crate::models::{Extracted, FieldName};

pub fn completeness_ratio(extracted: &Extracted) -> f64 {
    extracted.present_count() as f64 / FieldName::EXPECTED.len() as f64
}

pub fn confidence_score(extracted: &Extracted, source_weight: f64) -> f64 {
    (completeness_ratio(extracted) * source_weight).clamp(0.0, 1.0)
}

/// Human-readable label for a confidence score.
pub fn confidence_label(score: f64) -> &'static str {
    if score >= 0.8 {
        "High"
    } else if score >= 0.5 {
        "Medium"
    } else {
        "Low"
    }
}
