//! Scorer node: label-range tracking, loss accounting and the output link.

use crate::context::LearnContext;
use crate::error::{LearnResult, LearnerError};
use crate::example::{Example, Label, Prediction};
use crate::learner::{LearnerHandle, SharedSingle, SingleLearner};
use crate::loss::LinkFunction;
use crate::model_io::ModelBuffer;

pub struct Scorer {
    name: String,
    link: LinkFunction,
    base: SharedSingle,
}

impl Scorer {
    pub fn new(link: LinkFunction, base: SharedSingle) -> Self {
        Self {
            name: format!("scorer-{}", link.name()),
            link,
            base,
        }
    }

    pub fn link(&self) -> LinkFunction {
        self.link
    }

    fn label_of(&self, ec: &Example) -> LearnResult<Option<f32>> {
        match ec.label {
            Label::Simple(label) => Ok(label),
            Label::Cb(_) => Err(LearnerError::LabelMismatch {
                node: self.name.clone(),
                expected: "simple",
            }),
        }
    }

    fn predict_or_learn(&mut self, ctx: &mut LearnContext, ec: &mut Example, is_learn: bool) -> LearnResult<()> {
        let label = self.label_of(ec)?;
        if let Some(label) = label {
            ctx.set_minmax(label);
        }

        let learn = is_learn && label.is_some() && ec.weight > 0.0 && !ec.holdout;
        if learn {
            self.base.borrow_mut().learn(ctx, ec)?;
        } else {
            self.base.borrow_mut().predict(ctx, ec)?;
        }

        if let Some(label) = label {
            if ec.weight > 0.0 {
                ec.loss = ctx.loss.get_loss(&ctx.stats, ec.scalar(), label) * ec.weight;
                if is_learn {
                    ctx.stats.record_loss(ec.holdout, ec.loss, ec.weight, label);
                }
            }
        }
        ec.pred = Prediction::Scalar(self.link.apply(ec.scalar()));
        Ok(())
    }
}

impl SingleLearner for Scorer {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&mut self, ctx: &mut LearnContext, ec: &mut Example) -> LearnResult<()> {
        self.predict_or_learn(ctx, ec, false)
    }

    fn learn(&mut self, ctx: &mut LearnContext, ec: &mut Example) -> LearnResult<()> {
        self.predict_or_learn(ctx, ec, true)
    }

    fn update(&mut self, ctx: &mut LearnContext, ec: &mut Example) -> LearnResult<()> {
        self.base.borrow_mut().update(ctx, ec)
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

    fn base(&self) -> Option<LearnerHandle> {
        Some(LearnerHandle::Single(self.base.clone()))
    }
}
