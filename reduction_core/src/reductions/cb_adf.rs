//! Contextual-bandit node over action-dependent features.
//!
//! Every action example is scored as a regression on its own features merged
//! with the shared example's. Learning regresses the observed action's cost,
//! importance-weighted by the inverse logging probability.

use crate::context::LearnContext;
use crate::error::{LearnResult, LearnerError};
use crate::example::{ActionScore, Example, ExampleType, Label, Prediction};
use crate::learner::{LabelType, LearnerHandle, MultiLearner, PredictionType, SharedSingle};
use crate::model_io::ModelBuffer;

pub struct CbAdf {
    name: String,
    base: SharedSingle,
    scratch: Example,
}

impl CbAdf {
    pub fn new(base: SharedSingle) -> Self {
        Self {
            name: "cb_adf".to_string(),
            base,
            scratch: Example::new(),
        }
    }

    fn is_action(ec: &Example) -> bool {
        !matches!(ec.kind, ExampleType::Shared | ExampleType::Feedback)
    }

    /// Rebuild the scratch example as `action` plus the shared features.
    fn load_scratch(&mut self, shared: Option<&Example>, action: &Example) {
        self.scratch.clear();
        self.scratch.copy_namespaces_from(action);
        if let Some(shared) = shared {
            self.scratch.copy_namespaces_from(shared);
        }
        self.scratch.ft_offset = action.ft_offset;
        self.scratch.holdout = action.holdout;
    }

    fn predict_actions(&mut self, ctx: &mut LearnContext, batch: &mut [Example]) -> LearnResult<()> {
        if batch.is_empty() {
            return Err(LearnerError::EmptyBatch {
                node: self.name.clone(),
            });
        }
        let shared = batch.iter().position(|ec| ec.kind == ExampleType::Shared);
        let mut scores = Vec::new();
        let mut action = 0;
        for position in 0..batch.len() {
            if !Self::is_action(&batch[position]) {
                continue;
            }
            self.load_scratch(shared.map(|s| &batch[s]), &batch[position]);
            self.base.borrow_mut().predict(ctx, &mut self.scratch)?;
            let score = self.scratch.scalar();
            batch[position].partial_prediction = score;
            scores.push(ActionScore { action, score });
            action += 1;
        }
        scores.sort_by(|a, b| a.score.total_cmp(&b.score));
        batch[0].pred = Prediction::ActionScores(scores);
        Ok(())
    }
}

impl MultiLearner for CbAdf {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&mut self, ctx: &mut LearnContext, batch: &mut [Example]) -> LearnResult<()> {
        self.predict_actions(ctx, batch)
    }

    fn learn(&mut self, ctx: &mut LearnContext, batch: &mut [Example]) -> LearnResult<()> {
        self.predict_actions(ctx, batch)?;

        let shared = batch.iter().position(|ec| ec.kind == ExampleType::Shared);
        let chosen = batch
            .iter()
            .position(|ec| Self::is_action(ec) && ec.has_observed_cost());
        let Some(chosen) = chosen else {
            return Ok(());
        };
        let Some(observed) = batch[chosen].cb_label().and_then(|l| l.observed_cost()).copied() else {
            return Ok(());
        };

        self.load_scratch(shared.map(|s| &batch[s]), &batch[chosen]);
        self.scratch.label = Label::Simple(Some(observed.cost));
        self.scratch.weight = batch[chosen].weight / observed.probability;
        self.base.borrow_mut().learn(ctx, &mut self.scratch)?;
        batch[chosen].loss = self.scratch.loss;
        Ok(())
    }

    fn save_load(
        &mut self,
        ctx: &mut LearnContext,
        buf: &mut ModelBuffer,
        read: bool,
        text: bool,
    ) -> LearnResult<()> {
        self.base.borrow_mut().save_load(ctx, buf, read, text)
    }

    fn end_pass(&mut self, ctx: &mut LearnContext) -> LearnResult<()> {
        self.base.borrow_mut().end_pass(ctx)
    }

    fn input_label_type(&self) -> LabelType {
        LabelType::Cb
    }

    fn output_prediction_type(&self) -> PredictionType {
        PredictionType::ActionScores
    }

    fn base(&self) -> Option<LearnerHandle> {
        Some(LearnerHandle::Single(self.base.clone()))
    }
}
