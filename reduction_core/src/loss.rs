//! Loss and link functions.

use serde::{Deserialize, Serialize};

use crate::context::SharedStats;
use crate::math::corrected_exp;

/// Fixed prediction bounds used with the logistic loss.
pub const LOGISTIC_BOUND: f32 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossFunction {
    #[default]
    Squared,
    Logistic,
}

impl LossFunction {
    pub fn name(self) -> &'static str {
        match self {
            LossFunction::Squared => "squared",
            LossFunction::Logistic => "logistic",
        }
    }

    /// Whether the label range is learned from the data.
    pub fn tracks_label_range(self) -> bool {
        matches!(self, LossFunction::Squared)
    }

    /// Initial `(min, max)` prediction bounds.
    pub fn initial_bounds(self) -> (f32, f32) {
        match self {
            LossFunction::Squared => (0.0, 0.0),
            LossFunction::Logistic => (-LOGISTIC_BOUND, LOGISTIC_BOUND),
        }
    }

    pub fn get_loss(self, stats: &SharedStats, prediction: f32, label: f32) -> f32 {
        match self {
            LossFunction::Squared => {
                let (min, max) = (stats.min_label, stats.max_label);
                if prediction <= max && prediction >= min {
                    (prediction - label) * (prediction - label)
                } else if prediction < min {
                    if label == min {
                        0.0
                    } else {
                        (label - min) * (label - min) + 2.0 * (label - min) * (min - prediction)
                    }
                } else if label == max {
                    0.0
                } else {
                    (max - label) * (max - label) + 2.0 * (max - label) * (prediction - max)
                }
            }
            LossFunction::Logistic => (1.0 + corrected_exp(-label * prediction)).ln(),
        }
    }

    pub fn first_derivative(self, stats: &SharedStats, prediction: f32, label: f32) -> f32 {
        match self {
            LossFunction::Squared => {
                let clamped = prediction.max(stats.min_label).min(stats.max_label);
                2.0 * (clamped - label)
            }
            LossFunction::Logistic => -label / (1.0 + corrected_exp(label * prediction)),
        }
    }
}

/// Transformation applied by the scorer to the raw prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkFunction {
    #[default]
    Identity,
    Logistic,
    Glf1,
    Poisson,
}

impl LinkFunction {
    pub fn name(self) -> &'static str {
        match self {
            LinkFunction::Identity => "identity",
            LinkFunction::Logistic => "logistic",
            LinkFunction::Glf1 => "glf1",
            LinkFunction::Poisson => "poisson",
        }
    }

    pub fn apply(self, raw: f32) -> f32 {
        match self {
            LinkFunction::Identity => raw,
            LinkFunction::Logistic => 1.0 / (1.0 + corrected_exp(-raw)),
            LinkFunction::Glf1 => 2.0 / (1.0 + corrected_exp(-raw)) - 1.0,
            LinkFunction::Poisson => corrected_exp(raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(min: f32, max: f32) -> SharedStats {
        let mut stats = SharedStats::new(LossFunction::Squared);
        stats.min_label = min;
        stats.max_label = max;
        stats
    }

    #[test]
    fn squared_derivative_clamps_prediction() {
        let stats = stats(0.0, 1.0);
        assert_eq!(LossFunction::Squared.first_derivative(&stats, 0.0, 1.0), -2.0);
        assert_eq!(LossFunction::Squared.first_derivative(&stats, 3.0, 1.0), 0.0);
    }

    #[test]
    fn squared_loss_is_linear_outside_range() {
        let stats = stats(0.0, 1.0);
        assert_eq!(LossFunction::Squared.get_loss(&stats, 0.5, 1.0), 0.25);
        assert_eq!(LossFunction::Squared.get_loss(&stats, 2.0, 1.0), 0.0);
        // label 0.5, prediction 2: (1 - 0.5)^2 + 2 * 0.5 * 1
        assert_eq!(LossFunction::Squared.get_loss(&stats, 2.0, 0.5), 1.25);
    }

    #[test]
    fn logistic_loss_matches_closed_form() {
        let stats = SharedStats::new(LossFunction::Logistic);
        let loss = LossFunction::Logistic.get_loss(&stats, 0.0, 1.0);
        assert!((loss - std::f32::consts::LN_2).abs() < 1e-6);
        let derivative = LossFunction::Logistic.first_derivative(&stats, 0.0, -1.0);
        assert!((derivative - 0.5).abs() < 1e-6);
    }

    #[test]
    fn links_map_zero_to_expected_values() {
        assert_eq!(LinkFunction::Identity.apply(0.3), 0.3);
        assert_eq!(LinkFunction::Logistic.apply(0.0), 0.5);
        assert_eq!(LinkFunction::Glf1.apply(0.0), 0.0);
        assert_eq!(LinkFunction::Poisson.apply(0.0), 1.0);
    }
}
