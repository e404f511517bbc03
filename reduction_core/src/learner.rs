//! Learner node interfaces.
//!
//! A stack is a chain of nodes, each owning (or sharing) exactly one inner
//! node. Single-line nodes see one [`Example`]; multi-line nodes see a whole
//! batch. Nodes are held behind `Rc<RefCell<..>>` so that a second chain can
//! terminate in a node that was already built for the first one.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::context::LearnContext;
use crate::error::LearnResult;
use crate::example::Example;
use crate::model_io::ModelBuffer;

/// Label variant a node consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelType {
    Simple,
    Cb,
}

impl fmt::Display for LabelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelType::Simple => f.write_str("simple"),
            LabelType::Cb => f.write_str("contextual-bandit"),
        }
    }
}

/// Prediction variant a node produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionType {
    Scalar,
    ActionScores,
}

/// Node operating on single-line examples.
pub trait SingleLearner {
    fn name(&self) -> &str;

    fn predict(&mut self, ctx: &mut LearnContext, ec: &mut Example) -> LearnResult<()>;

    /// Predict, then update parameters.
    fn learn(&mut self, ctx: &mut LearnContext, ec: &mut Example) -> LearnResult<()>;

    /// Statistics-only update; nodes without a distinct path learn.
    fn update(&mut self, ctx: &mut LearnContext, ec: &mut Example) -> LearnResult<()> {
        self.learn(ctx, ec)
    }

    fn sensitivity(&mut self, ctx: &mut LearnContext, ec: &mut Example) -> LearnResult<f32> {
        match self.base() {
            Some(LearnerHandle::Single(base)) => base.borrow_mut().sensitivity(ctx, ec),
            _ => Ok(0.0),
        }
    }

    fn save_load(
        &mut self,
        ctx: &mut LearnContext,
        buf: &mut ModelBuffer,
        read: bool,
        text: bool,
    ) -> LearnResult<()>;

    fn end_pass(&mut self, ctx: &mut LearnContext) -> LearnResult<()>;

    fn input_label_type(&self) -> LabelType {
        LabelType::Simple
    }

    fn output_prediction_type(&self) -> PredictionType {
        PredictionType::Scalar
    }

    /// Number of independent problems this node multiplexes onto its base.
    fn params_per_weight(&self) -> u64 {
        1
    }

    fn base(&self) -> Option<LearnerHandle> {
        None
    }
}

/// Node operating on multi-line batches.
pub trait MultiLearner {
    fn name(&self) -> &str;

    fn predict(&mut self, ctx: &mut LearnContext, batch: &mut [Example]) -> LearnResult<()>;

    fn learn(&mut self, ctx: &mut LearnContext, batch: &mut [Example]) -> LearnResult<()>;

    fn save_load(
        &mut self,
        ctx: &mut LearnContext,
        buf: &mut ModelBuffer,
        read: bool,
        text: bool,
    ) -> LearnResult<()>;

    fn end_pass(&mut self, ctx: &mut LearnContext) -> LearnResult<()>;

    fn input_label_type(&self) -> LabelType {
        LabelType::Cb
    }

    fn output_prediction_type(&self) -> PredictionType {
        PredictionType::ActionScores
    }

    fn params_per_weight(&self) -> u64 {
        1
    }

    fn base(&self) -> Option<LearnerHandle> {
        None
    }
}

pub type SharedSingle = Rc<RefCell<dyn SingleLearner>>;
pub type SharedMulti = Rc<RefCell<dyn MultiLearner>>;

/// Shared handle to any node of a stack.
#[derive(Clone)]
pub enum LearnerHandle {
    Single(SharedSingle),
    Multi(SharedMulti),
}

impl fmt::Debug for LearnerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LearnerHandle::Single(_) => write!(f, "Single({})", self.name()),
            LearnerHandle::Multi(_) => write!(f, "Multi({})", self.name()),
        }
    }
}

impl LearnerHandle {
    pub fn name(&self) -> String {
        match self {
            LearnerHandle::Single(node) => node.borrow().name().to_string(),
            LearnerHandle::Multi(node) => node.borrow().name().to_string(),
        }
    }

    pub fn base(&self) -> Option<LearnerHandle> {
        match self {
            LearnerHandle::Single(node) => node.borrow().base(),
            LearnerHandle::Multi(node) => node.borrow().base(),
        }
    }

    pub fn is_multiline(&self) -> bool {
        matches!(self, LearnerHandle::Multi(_))
    }

    pub fn input_label_type(&self) -> LabelType {
        match self {
            LearnerHandle::Single(node) => node.borrow().input_label_type(),
            LearnerHandle::Multi(node) => node.borrow().input_label_type(),
        }
    }

    pub fn output_prediction_type(&self) -> PredictionType {
        match self {
            LearnerHandle::Single(node) => node.borrow().output_prediction_type(),
            LearnerHandle::Multi(node) => node.borrow().output_prediction_type(),
        }
    }

    fn own_params_per_weight(&self) -> u64 {
        match self {
            LearnerHandle::Single(node) => node.borrow().params_per_weight(),
            LearnerHandle::Multi(node) => node.borrow().params_per_weight(),
        }
    }

    /// Product of `params_per_weight` over this node and everything below.
    pub fn total_params_per_weight(&self) -> u64 {
        let mut total = 1;
        let mut node = Some(self.clone());
        while let Some(current) = node {
            total *= current.own_params_per_weight();
            node = current.base();
        }
        total
    }

    /// Node names from the bottom of the chain to this node.
    pub fn enabled_reductions(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut node = Some(self.clone());
        while let Some(current) = node {
            names.push(current.name());
            node = current.base();
        }
        names.reverse();
        names
    }

    /// First node, walking down from this one, whose name starts with `prefix`.
    pub fn find_by_name_prefix(&self, prefix: &str) -> Option<LearnerHandle> {
        let mut node = Some(self.clone());
        while let Some(current) = node {
            if current.name().starts_with(prefix) {
                return Some(current);
            }
            node = current.base();
        }
        None
    }

    pub fn save_load(
        &self,
        ctx: &mut LearnContext,
        buf: &mut ModelBuffer,
        read: bool,
        text: bool,
    ) -> LearnResult<()> {
        match self {
            LearnerHandle::Single(node) => node.borrow_mut().save_load(ctx, buf, read, text),
            LearnerHandle::Multi(node) => node.borrow_mut().save_load(ctx, buf, read, text),
        }
    }

    pub fn end_pass(&self, ctx: &mut LearnContext) -> LearnResult<()> {
        match self {
            LearnerHandle::Single(node) => node.borrow_mut().end_pass(ctx),
            LearnerHandle::Multi(node) => node.borrow_mut().end_pass(ctx),
        }
    }
}
