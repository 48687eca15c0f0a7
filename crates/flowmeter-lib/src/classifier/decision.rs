//! Confidence policy over a probability vector

use crate::models::ConfidenceLevel;

/// Minimum lead of the top class over the runner-up for a confident label
pub const MIN_MARGIN: f32 = 0.2;

/// A runner-up at or below this never makes the top class ambiguous
pub const MAX_RUNNER_UP: f32 = 0.3;

/// Top probabilities below this are low confidence
pub const LOW_CONFIDENCE_CEILING: f32 = 0.5;

/// Argmax of a probability vector with its confidence level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub index: usize,
    pub top: f32,
    pub second: f32,
    pub level: ConfidenceLevel,
}

impl Decision {
    pub fn is_confident(&self) -> bool {
        self.level == ConfidenceLevel::High
    }
}

/// Apply the confidence policy. `None` for an empty vector.
pub fn decide(probabilities: &[f32], threshold: f32) -> Option<Decision> {
    let mut index = 0;
    let mut top = f32::NEG_INFINITY;
    let mut second = 0.0f32;

    if probabilities.is_empty() {
        return None;
    }

    for (i, &p) in probabilities.iter().enumerate() {
        if p > top {
            if i > 0 {
                second = top;
            }
            top = p;
            index = i;
        } else if p > second {
            second = p;
        }
    }

    let margin = top - second;
    let level = if top > threshold && (margin >= MIN_MARGIN || second <= MAX_RUNNER_UP) {
        ConfidenceLevel::High
    } else if margin < MIN_MARGIN && second > MAX_RUNNER_UP {
        ConfidenceLevel::MultipleCandidates
    } else if top < LOW_CONFIDENCE_CEILING {
        ConfidenceLevel::Low
    } else {
        ConfidenceLevel::Uncertain
    };

    Some(Decision {
        index,
        top,
        second,
        level,
    })
}
