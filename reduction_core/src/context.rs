//! Per-chain learning context.
//!
//! Every chain (the primary stack and the IGL decoder) owns one
//! [`LearnContext`] and passes it by reference into each predict/learn call.
//! Nodes shared between chains therefore see whichever context the caller
//! hands them and never keep a pointer to one.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::example::NamespaceIndex;
use crate::loss::LossFunction;

/// Running statistics of one chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedStats {
    pub min_label: f32,
    pub max_label: f32,
    pub example_number: u64,
    pub total_features: u64,
    pub sum_loss: f64,
    pub sum_loss_since_last_dump: f64,
    pub weighted_labeled_examples: f64,
    pub weighted_labels: f64,
    pub weighted_holdout_examples: f64,
    pub holdout_sum_loss: f64,
    pub weighted_holdout_examples_since_last_pass: f64,
    pub holdout_sum_loss_since_last_pass: f64,
    pub holdout_best_loss: f32,
    pub holdout_best_pass: u64,
}

impl SharedStats {
    pub fn new(loss: LossFunction) -> Self {
        let (min_label, max_label) = loss.initial_bounds();
        Self {
            min_label,
            max_label,
            example_number: 0,
            total_features: 0,
            sum_loss: 0.0,
            sum_loss_since_last_dump: 0.0,
            weighted_labeled_examples: 0.0,
            weighted_labels: 0.0,
            weighted_holdout_examples: 0.0,
            holdout_sum_loss: 0.0,
            weighted_holdout_examples_since_last_pass: 0.0,
            holdout_sum_loss_since_last_pass: 0.0,
            holdout_best_loss: f32::MAX,
            holdout_best_pass: 0,
        }
    }

    /// Count one top-level example.
    pub fn record_example(&mut self, num_features: usize) {
        self.example_number += 1;
        self.total_features += num_features as u64;
    }

    /// Account the weighted loss of one labeled prediction.
    pub fn record_loss(&mut self, holdout: bool, loss: f32, weight: f32, label: f32) {
        let (loss, weight) = (f64::from(loss), f64::from(weight));
        if holdout {
            self.weighted_holdout_examples += weight;
            self.holdout_sum_loss += loss;
            self.weighted_holdout_examples_since_last_pass += weight;
            self.holdout_sum_loss_since_last_pass += loss;
        } else {
            self.weighted_labeled_examples += weight;
            self.weighted_labels += f64::from(label) * weight;
            self.sum_loss += loss;
            self.sum_loss_since_last_dump += loss;
        }
    }

    pub fn average_loss(&self) -> f64 {
        if self.weighted_labeled_examples > 0.0 {
            self.sum_loss / self.weighted_labeled_examples
        } else {
            0.0
        }
    }

    /// Close the holdout window of the current pass.
    ///
    /// Returns `true` when the pass improved on the best holdout loss. The
    /// caller's `no_win_counter` is reset on improvement and incremented
    /// otherwise, unless no holdout loss has ever been observed.
    pub fn summarize_holdout(&mut self, current_pass: u64, no_win_counter: &mut u32) -> bool {
        let this_loss = if self.weighted_holdout_examples_since_last_pass > 0.0 {
            (self.holdout_sum_loss_since_last_pass / self.weighted_holdout_examples_since_last_pass)
                as f32
        } else {
            f32::MAX * 0.5
        };
        self.weighted_holdout_examples_since_last_pass = 0.0;
        self.holdout_sum_loss_since_last_pass = 0.0;

        if this_loss < self.holdout_best_loss {
            self.holdout_best_loss = this_loss;
            self.holdout_best_pass = current_pass;
            *no_win_counter = 0;
            return true;
        }
        if this_loss != f32::MAX || self.holdout_best_loss.is_finite() {
            *no_win_counter += 1;
        }
        false
    }
}

/// Loss function, statistics and run flags of one chain.
#[derive(Debug, Clone, PartialEq)]
pub struct LearnContext {
    pub loss: LossFunction,
    pub stats: SharedStats,
    pub interactions: Vec<Vec<NamespaceIndex>>,
    pub quiet: bool,
    pub save_resume: bool,
    pub holdout_off: bool,
    pub check_holdout_every_n_passes: u64,
    pub current_pass: u64,
    pub done: bool,
}

impl LearnContext {
    pub fn new(loss: LossFunction) -> Self {
        Self {
            loss,
            stats: SharedStats::new(loss),
            interactions: Vec::new(),
            quiet: false,
            save_resume: true,
            holdout_off: true,
            check_holdout_every_n_passes: 1,
            current_pass: 0,
            done: false,
        }
    }

    pub fn with_interactions(mut self, interactions: Vec<Vec<NamespaceIndex>>) -> Self {
        self.interactions = interactions;
        self
    }

    /// Widen the prediction bounds to cover `label` (squared loss only).
    pub fn set_minmax(&mut self, label: f32) {
        if !self.loss.tracks_label_range() {
            return;
        }
        if label < self.stats.min_label {
            self.stats.min_label = label;
        }
        if label > self.stats.max_label {
            self.stats.max_label = label;
        }
    }

    /// Replace NaN by 0 and clamp into the current prediction bounds.
    pub fn finalize_prediction(&self, raw: f32) -> f32 {
        if raw.is_nan() {
            warn!(
                example = self.stats.example_number,
                "NaN prediction, replacing with 0"
            );
            return 0.0;
        }
        raw.max(self.stats.min_label).min(self.stats.max_label)
    }

    pub fn set_done(&mut self) {
        debug!(pass = self.current_pass, "early termination requested");
        self.done = true;
    }
}
