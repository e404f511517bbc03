//! Interaction-grounded learning.
//!
//! The node trains a decoder policy (psi) to recognise which action a piece
//! of feedback belongs to, and turns confident decoder predictions into costs
//! for the primary policy (pi). The decoder is a single-line chain that ends
//! in the primary chain's optimizer, addressed at its own problem offset and
//! driven with its own [`LearnContext`], so the primary chain's loss and
//! running statistics never see decoder examples.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::LearnContext;
use crate::error::{LearnResult, LearnerError};
use crate::example::{Example, ExampleType, Feature, Label, NamespaceIndex};
use crate::learner::{LabelType, LearnerHandle, MultiLearner, PredictionType, SharedMulti, SharedSingle};
use crate::model_io::ModelBuffer;

/// Decoder and cost-rewriting parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct IglSettings {
    /// Namespace the feedback feature is appended to in decoder examples.
    pub feedback_namespace: NamespaceIndex,
    pub p_unlabeled_prior: f32,
    /// Importance of the decoder example built from the chosen action.
    pub positive_importance: f32,
    /// Importance of decoder examples built from every other line.
    pub negative_importance: f32,
    /// Hashed feedback indices that mark a negative interaction.
    pub negative_feedback: Vec<u64>,
}

impl Default for IglSettings {
    fn default() -> Self {
        Self {
            feedback_namespace: b'F',
            p_unlabeled_prior: 0.5,
            positive_importance: 1.0,
            negative_importance: 0.5,
            negative_feedback: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IglCounters {
    /// Decoder examples learned.
    pub decoder_examples: u64,
    /// Batches whose decoder score crossed one half.
    pub extreme_batches: u64,
    /// Batches forwarded to the primary policy's learn.
    pub batches_learned: u64,
}

pub struct InteractionGround {
    name: String,
    primary: SharedMulti,
    decoder: SharedSingle,
    decoder_ctx: LearnContext,
    settings: IglSettings,
    decoder_offset: u64,
    scratch: Example,
    counters: IglCounters,
}

impl InteractionGround {
    /// `decoder_offset` is the feature-index offset selecting the decoder's
    /// problem in the shared optimizer.
    pub fn new(
        primary: SharedMulti,
        decoder: SharedSingle,
        decoder_ctx: LearnContext,
        settings: IglSettings,
        decoder_offset: u64,
    ) -> Self {
        Self {
            name: "interaction_ground".to_string(),
            primary,
            decoder,
            decoder_ctx,
            settings,
            decoder_offset,
            scratch: Example::new(),
            counters: IglCounters::default(),
        }
    }

    pub fn counters(&self) -> IglCounters {
        self.counters
    }

    pub fn settings(&self) -> &IglSettings {
        &self.settings
    }

    /// Replace the hashed negative-feedback indices.
    pub fn set_negative_feedback(&mut self, indices: Vec<u64>) {
        self.settings.negative_feedback = indices;
    }

    pub fn decoder(&self) -> &SharedSingle {
        &self.decoder
    }

    pub fn decoder_context(&self) -> &LearnContext {
        &self.decoder_ctx
    }

    /// Cost written to the chosen action when the decoder is confident.
    pub fn extreme_cost(&self, is_negative: bool) -> f32 {
        let negative = if is_negative { 1.0 } else { 0.0 };
        -1.0 + negative * (1.0 + 1.0 / self.settings.p_unlabeled_prior)
    }

    /// Rebuild the scratch example from `source` for one decoder call.
    fn load_scratch(&mut self, source: &Example, feedback: Option<Feature>, chosen: bool) {
        self.scratch.clear();
        self.scratch.copy_namespaces_from(source);
        if let Some(feedback) = feedback {
            self.scratch
                .push_feature(self.settings.feedback_namespace, feedback.index, feedback.value);
        }
        let (label, weight) = if chosen {
            (1.0, self.settings.positive_importance)
        } else {
            (-1.0, self.settings.negative_importance)
        };
        self.scratch.label = Label::Simple(Some(label));
        self.scratch.weight = weight;
        self.scratch.ft_offset = source.ft_offset + self.decoder_offset;
    }

    fn feedback_feature(batch: &[Example]) -> Option<Feature> {
        batch
            .iter()
            .rev()
            .find(|ec| ec.kind == ExampleType::Feedback)
            .and_then(|ec| ec.namespaces().find_map(|(_, fs)| fs.iter().next().copied()))
    }
}

impl MultiLearner for InteractionGround {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&mut self, ctx: &mut LearnContext, batch: &mut [Example]) -> LearnResult<()> {
        self.primary.borrow_mut().predict(ctx, batch)
    }

    fn learn(&mut self, ctx: &mut LearnContext, batch: &mut [Example]) -> LearnResult<()> {
        if batch.is_empty() {
            return Err(LearnerError::EmptyBatch {
                node: self.name.clone(),
            });
        }

        let chosen = batch
            .iter()
            .position(|ec| ec.kind != ExampleType::Feedback && ec.has_observed_cost());
        let Some(chosen) = chosen else {
            debug!(lines = batch.len(), "no observed action, predicting only");
            return self.primary.borrow_mut().predict(ctx, batch);
        };

        let feedback = Self::feedback_feature(batch);
        let is_negative = feedback
            .map(|f| self.settings.negative_feedback.contains(&f.index))
            .unwrap_or(false);

        self.load_scratch(&batch[chosen], feedback, true);
        self.decoder
            .borrow_mut()
            .predict(&mut self.decoder_ctx, &mut self.scratch)?;
        let psi_pred = self.scratch.scalar();

        for position in 0..batch.len() {
            if batch[position].kind == ExampleType::Feedback {
                continue;
            }
            self.load_scratch(&batch[position], feedback, position == chosen);
            self.decoder
                .borrow_mut()
                .learn(&mut self.decoder_ctx, &mut self.scratch)?;
            self.counters.decoder_examples += 1;
        }
        self.scratch.clear();

        let extreme = psi_pred * 2.0 > 1.0;
        let cost = if extreme {
            self.counters.extreme_batches += 1;
            self.extreme_cost(is_negative)
        } else {
            0.0
        };
        debug!(psi_pred, extreme, is_negative, cost, "decoder decision");

        if let Some(observed) = batch[chosen]
            .cb_label_mut()
            .and_then(|label| label.observed_cost_mut())
        {
            observed.cost = cost;
        }

        self.primary.borrow_mut().learn(ctx, batch)?;
        self.counters.batches_learned += 1;
        Ok(())
    }

    fn save_load(
        &mut self,
        ctx: &mut LearnContext,
        buf: &mut ModelBuffer,
        read: bool,
        text: bool,
    ) -> LearnResult<()> {
        buf.field(&mut self.counters, "igl.counters", read, text)?;
        self.primary.borrow_mut().save_load(ctx, buf, read, text)
    }

    fn end_pass(&mut self, ctx: &mut LearnContext) -> LearnResult<()> {
        self.primary.borrow_mut().end_pass(ctx)
    }

    fn input_label_type(&self) -> LabelType {
        LabelType::Cb
    }

    fn output_prediction_type(&self) -> PredictionType {
        PredictionType::ActionScores
    }

    /// Primary and decoder problems share one optimizer.
    fn params_per_weight(&self) -> u64 {
        2
    }

    fn base(&self) -> Option<LearnerHandle> {
        Some(LearnerHandle::Multi(self.primary.clone()))
    }
}
