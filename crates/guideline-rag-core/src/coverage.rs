//! Coverage classification from nearest-neighbor distance.
//!
//! The verdict depends only on the single best (lowest) distance:
//!
//! ```text
//! d <= clear            -> CLEAR
//! clear < d <= partial  -> PARTIAL
//! otherwise             -> NONE
//! ```
//!
//! An empty retrieval, or a NaN distance, is always `NONE`.

use serde::{Deserialize, Serialize};

use crate::error::{RagError, RagResult};
use crate::models::{Coverage, RetrievalPair};

/// Two ascending distance cut-offs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageThresholds {
    pub clear: f32,
    pub partial: f32,
}

impl CoverageThresholds {
    /// Validated constructor: both finite, non-negative, and `clear < partial`.
    pub fn new(clear: f32, partial: f32) -> RagResult<Self> {
        if !clear.is_finite() || !partial.is_finite() || clear < 0.0 {
            return Err(RagError::Config(format!(
                "coverage thresholds must be finite and non-negative (clear={}, partial={})",
                clear, partial
            )));
        }
        if clear >= partial {
            return Err(RagError::Config(format!(
                "clear_threshold ({}) must be below partial_threshold ({})",
                clear, partial
            )));
        }
        Ok(Self { clear, partial })
    }
}

impl Default for CoverageThresholds {
    fn default() -> Self {
        Self {
            clear: 1.2,
            partial: 2.2,
        }
    }
}

/// Classify a single best distance.
pub fn classify(best_distance: f32, thresholds: CoverageThresholds) -> Coverage {
    if best_distance <= thresholds.clear {
        Coverage::Clear
    } else if best_distance <= thresholds.partial {
        Coverage::Partial
    } else {
        Coverage::None
    }
}

/// Classify a retrieval result by its lowest distance.
///
/// Does not assume the pairs are sorted. NaN distances are ignored.
pub fn classify_pairs(pairs: &[RetrievalPair], thresholds: CoverageThresholds) -> Coverage {
    let best = pairs
        .iter()
        .map(|p| p.distance)
        .filter(|d| !d.is_nan())
        .min_by(|a, b| a.total_cmp(b));

    match best {
        Some(d) => classify(d, thresholds),
        None => Coverage::None,
    }
}
