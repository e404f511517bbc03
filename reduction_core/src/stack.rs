//! Reduction Stack Builder and the [`Workspace`] driver.
//!
//! Stacks are built bottom-up: the optimizer first (fresh, or a node reused
//! from another chain), then each enabled reduction wrapping the one below.
//! The IGL stage builds a second chain of its own (a logistic scorer over the
//! primary chain's coin-betting optimizer) with a separate context.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::checkpoint::{CheckpointError, Checkpointable};
use crate::config::LearnerConfig;
use crate::context::LearnContext;
use crate::error::{ConfigError, ConfigResult, LearnResult, LearnerError};
use crate::example::{namespace_index, Example, FeatureHasher};
use crate::learner::{LabelType, LearnerHandle, PredictionType, SharedMulti, SharedSingle};
use crate::logging::ProgressLogger;
use crate::loss::{LinkFunction, LossFunction};
use crate::model_io::ModelBuffer;
use crate::optimizer::Ftrl;
use crate::reductions::{CbAdf, IglSettings, InteractionGround, Scorer};
use crate::weights::WeightStore;

/// Name prefix of the optimizer the IGL decoder chain reuses.
pub const DECODER_REUSE_PREFIX: &str = "ftrl-Coin";

/// Stages in bottom-up order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Optimizer,
    Scorer,
    CbAdf,
    InteractionGround,
}

/// Result of [`StackBuilder::setup`].
pub struct BuiltStack {
    pub root: LearnerHandle,
    pub context: LearnContext,
    /// `None` when the optimizer was reused from another chain.
    pub optimizer: Option<Rc<RefCell<Ftrl>>>,
    pub interaction_ground: Option<Rc<RefCell<InteractionGround>>>,
    pub hasher: FeatureHasher,
}

pub struct StackBuilder<'a> {
    config: &'a LearnerConfig,
    reuse: Option<SharedSingle>,
    keep: Option<Vec<StageKind>>,
}

impl<'a> StackBuilder<'a> {
    pub fn new(config: &'a LearnerConfig) -> Self {
        Self {
            config,
            reuse: None,
            keep: None,
        }
    }

    /// Terminate the chain in `node` instead of a fresh optimizer.
    pub fn reusing(mut self, node: SharedSingle) -> Self {
        self.reuse = Some(node);
        self
    }

    /// Build only the listed stages rather than the configured ones.
    pub fn keep(mut self, stages: &[StageKind]) -> Self {
        self.keep = Some(stages.to_vec());
        self
    }

    /// Stages this builder will assemble, bottom-up.
    pub fn stages(&self) -> Vec<StageKind> {
        if let Some(keep) = &self.keep {
            let mut stages = keep.clone();
            if !stages.contains(&StageKind::Optimizer) {
                stages.insert(0, StageKind::Optimizer);
            }
            return stages;
        }
        let mut stages = vec![StageKind::Optimizer, StageKind::Scorer];
        if self.config.cb_enabled() {
            stages.push(StageKind::CbAdf);
        }
        if self.config.igl.experimental_igl {
            stages.push(StageKind::InteractionGround);
        }
        stages
    }

    pub fn setup(self) -> ConfigResult<BuiltStack> {
        let config = self.config;
        config.validate()?;
        let context = context_for(config)?;
        let stages = self.stages();

        let mut optimizer = None;
        let mut interaction_ground = None;
        let mut current: Option<LearnerHandle> = None;

        for stage in stages {
            current = Some(match (stage, current.take()) {
                (StageKind::Optimizer, None) => match self.reuse.clone() {
                    Some(node) => LearnerHandle::Single(node),
                    None => {
                        let ftrl = Rc::new(RefCell::new(new_optimizer(config)?));
                        optimizer = Some(ftrl.clone());
                        LearnerHandle::Single(ftrl)
                    }
                },
                (StageKind::Scorer, Some(LearnerHandle::Single(base))) => {
                    let scorer = Scorer::new(config.scorer.link, base);
                    LearnerHandle::Single(Rc::new(RefCell::new(scorer)))
                }
                (StageKind::CbAdf, Some(LearnerHandle::Single(base))) => {
                    LearnerHandle::Multi(Rc::new(RefCell::new(CbAdf::new(base))))
                }
                (StageKind::InteractionGround, Some(LearnerHandle::Multi(primary))) => {
                    let node = Rc::new(RefCell::new(build_interaction_ground(
                        config,
                        LearnerHandle::Multi(primary),
                    )?));
                    interaction_ground = Some(node.clone());
                    LearnerHandle::Multi(node)
                }
                (stage, below) => {
                    let below = below.map(|node| node.name()).unwrap_or_else(|| "nothing".into());
                    return Err(ConfigError::invalid(
                        "stack",
                        format!("{stage:?} cannot be stacked on {below}"),
                    ));
                }
            });
        }

        let root = current.ok_or_else(|| ConfigError::invalid("stack", "no stages enabled"))?;
        let hasher = FeatureHasher::new(config.weights.bits, root.total_params_per_weight());

        if let Some(igl) = &interaction_ground {
            let namespace = &config.igl.feedback_namespace;
            let negative = config
                .igl
                .negative_feedback
                .iter()
                .map(|token| hasher.hash(namespace, token))
                .collect();
            igl.borrow_mut().set_negative_feedback(negative);
        }

        debug!(stack = ?root.enabled_reductions(), "stack built");
        Ok(BuiltStack {
            root,
            context,
            optimizer,
            interaction_ground,
            hasher,
        })
    }
}

fn context_for(config: &LearnerConfig) -> ConfigResult<LearnContext> {
    let mut context = LearnContext::new(config.scorer.loss_function)
        .with_interactions(config.features.parsed()?);
    context.quiet = config.run.quiet;
    context.save_resume = config.run.save_resume;
    context.holdout_off = config.run.holdout_off;
    context.check_holdout_every_n_passes = config.run.check_holdout_every_n_passes;
    Ok(context)
}

fn new_optimizer(config: &LearnerConfig) -> ConfigResult<Ftrl> {
    let mode = config.optimizer.mode()?;
    let params = config.optimizer.params()?;
    let weights = WeightStore::new(config.weights.bits, mode.width(), config.weights.sparse);
    Ok(Ftrl::new(
        mode,
        params,
        weights,
        config.run.early_terminate,
        config.run.quiet,
    ))
}

fn incompatible(reason: impl Into<String>) -> ConfigError {
    ConfigError::IncompatibleDecoder {
        reason: reason.into(),
    }
}

fn build_interaction_ground(config: &LearnerConfig, primary: LearnerHandle) -> ConfigResult<InteractionGround> {
    let target = primary
        .find_by_name_prefix(DECODER_REUSE_PREFIX)
        .ok_or_else(|| ConfigError::ReuseTargetMissing {
            prefix: DECODER_REUSE_PREFIX.to_string(),
            enabled: primary.enabled_reductions(),
        })?;
    let LearnerHandle::Single(target) = target else {
        return Err(incompatible("the reused optimizer must be a single-line node"));
    };

    let decoder_config = config.decoder_config();
    if decoder_config.scorer.loss_function != LossFunction::Logistic {
        return Err(incompatible(format!(
            "decoder loss_function must be logistic, found {}",
            decoder_config.scorer.loss_function.name()
        )));
    }
    if decoder_config.scorer.link != LinkFunction::Logistic {
        return Err(incompatible(format!(
            "decoder link must be logistic, found {}",
            decoder_config.scorer.link.name()
        )));
    }

    let decoder = StackBuilder::new(&decoder_config)
        .reusing(target)
        .keep(&[StageKind::Scorer])
        .setup()?;
    if decoder.root.input_label_type() != LabelType::Simple
        || decoder.root.output_prediction_type() != PredictionType::Scalar
    {
        return Err(incompatible(format!(
            "decoder must consume {} labels and predict scalars",
            LabelType::Simple
        )));
    }
    let LearnerHandle::Single(decoder_root) = decoder.root else {
        return Err(incompatible("decoder must be a single-line chain"));
    };

    let LearnerHandle::Multi(primary_root) = &primary else {
        return Err(ConfigError::invalid("stack", "interaction_ground needs a multi-line base"));
    };
    let settings = IglSettings {
        feedback_namespace: config.igl.feedback_namespace_index(),
        p_unlabeled_prior: config.igl.p_unlabeled_prior,
        positive_importance: config.igl.positive_importance,
        negative_importance: config.igl.negative_importance,
        negative_feedback: Vec::new(),
    };
    Ok(InteractionGround::new(
        primary_root.clone(),
        decoder_root,
        decoder.context,
        settings,
        primary.total_params_per_weight(),
    ))
}

/// A built stack, its context and the example counters around it.
pub struct Workspace {
    config: LearnerConfig,
    root: LearnerHandle,
    optimizer: Rc<RefCell<Ftrl>>,
    interaction_ground: Option<Rc<RefCell<InteractionGround>>>,
    ctx: LearnContext,
    hasher: FeatureHasher,
    progress: Option<ProgressLogger>,
}

impl Workspace {
    pub fn new(config: LearnerConfig) -> ConfigResult<Self> {
        let built = StackBuilder::new(&config).setup()?;
        let optimizer = built
            .optimizer
            .ok_or_else(|| ConfigError::invalid("stack", "a workspace owns its optimizer"))?;
        let progress = if config.run.progress_log.is_empty() {
            None
        } else {
            Some(ProgressLogger::to_file(&config.run.progress_log)?)
        };
        Ok(Self {
            root: built.root,
            optimizer,
            interaction_ground: built.interaction_ground,
            ctx: built.context,
            hasher: built.hasher,
            progress,
            config,
        })
    }

    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }

    pub fn context(&self) -> &LearnContext {
        &self.ctx
    }

    pub fn hasher(&self) -> FeatureHasher {
        self.hasher
    }

    pub fn root(&self) -> &LearnerHandle {
        &self.root
    }

    pub fn optimizer(&self) -> &Rc<RefCell<Ftrl>> {
        &self.optimizer
    }

    pub fn interaction_ground(&self) -> Option<&Rc<RefCell<InteractionGround>>> {
        self.interaction_ground.as_ref()
    }

    pub fn progress(&self) -> Option<&ProgressLogger> {
        self.progress.as_ref()
    }

    pub fn enabled_reductions(&self) -> Vec<String> {
        self.root.enabled_reductions()
    }

    pub fn learner_by_name_prefix(&self, prefix: &str) -> Option<LearnerHandle> {
        self.root.find_by_name_prefix(prefix)
    }

    /// Hash `token` in `namespace` and append it to `ec`.
    pub fn add_feature(&self, ec: &mut Example, namespace: &str, token: &str, value: f32) {
        ec.push_feature(namespace_index(namespace), self.hasher.hash(namespace, token), value);
    }

    pub fn is_done(&self) -> bool {
        self.ctx.done
    }

    fn single_root(&self) -> LearnResult<SharedSingle> {
        match &self.root {
            LearnerHandle::Single(root) => Ok(root.clone()),
            LearnerHandle::Multi(_) => Err(LearnerError::WrongArity {
                actual: "multi-line",
            }),
        }
    }

    fn multi_root(&self) -> LearnResult<SharedMulti> {
        match &self.root {
            LearnerHandle::Multi(root) => Ok(root.clone()),
            LearnerHandle::Single(_) => Err(LearnerError::WrongArity {
                actual: "single-line",
            }),
        }
    }

    fn account(&mut self, label: Option<f32>, prediction: f32, features: usize) -> LearnResult<()> {
        self.ctx.stats.record_example(features);
        if let Some(progress) = &mut self.progress {
            progress.observe(&mut self.ctx.stats, label, prediction, features)?;
        }
        Ok(())
    }

    pub fn predict(&mut self, ec: &mut Example) -> LearnResult<()> {
        let root = self.single_root()?;
        root.borrow_mut().predict(&mut self.ctx, ec)?;
        self.account(ec.simple_label(), ec.scalar(), ec.num_features())
    }

    /// Learn from `ec`; holdout examples are only predicted and scored.
    pub fn learn(&mut self, ec: &mut Example) -> LearnResult<()> {
        let root = self.single_root()?;
        if self.ctx.holdout_off {
            ec.holdout = false;
        }
        root.borrow_mut().learn(&mut self.ctx, ec)?;
        self.account(ec.simple_label(), ec.scalar(), ec.num_features())
    }

    pub fn sensitivity(&mut self, ec: &mut Example) -> LearnResult<f32> {
        let root = self.single_root()?;
        let score = root.borrow_mut().sensitivity(&mut self.ctx, ec);
        score
    }

    pub fn predict_multi(&mut self, batch: &mut [Example]) -> LearnResult<()> {
        let root = self.multi_root()?;
        root.borrow_mut().predict(&mut self.ctx, batch)?;
        self.account_batch(batch)
    }

    pub fn learn_multi(&mut self, batch: &mut [Example]) -> LearnResult<()> {
        let root = self.multi_root()?;
        let holdout = !self.ctx.holdout_off && batch.iter().any(|ec| ec.holdout);
        if holdout {
            root.borrow_mut().predict(&mut self.ctx, batch)?;
        } else {
            root.borrow_mut().learn(&mut self.ctx, batch)?;
        }
        self.account_batch(batch)
    }

    fn account_batch(&mut self, batch: &[Example]) -> LearnResult<()> {
        let features = batch.iter().map(Example::num_features).sum();
        let top = batch
            .first()
            .and_then(|ec| ec.action_scores())
            .and_then(|scores| scores.first())
            .map(|score| score.score)
            .unwrap_or(0.0);
        self.account(None, top, features)
    }

    /// Close the current pass; sets [`Workspace::is_done`] when the holdout
    /// loss stopped improving.
    pub fn end_pass(&mut self) -> LearnResult<()> {
        self.ctx.current_pass += 1;
        self.root.end_pass(&mut self.ctx)
    }

    pub fn save_load(&mut self, buf: &mut ModelBuffer, read: bool, text: bool) -> LearnResult<()> {
        self.root.save_load(&mut self.ctx, buf, read, text)
    }

    /// Serialize the model without disturbing the live context.
    pub fn save_model(&self) -> LearnResult<ModelBuffer> {
        let mut ctx = self.ctx.clone();
        let mut buf = ModelBuffer::new();
        self.root.save_load(&mut ctx, &mut buf, false, false)?;
        Ok(buf)
    }

    /// Readable `name = value` dump of the model.
    pub fn dump_text(&self) -> LearnResult<String> {
        let mut ctx = self.ctx.clone();
        let mut buf = ModelBuffer::new();
        self.root.save_load(&mut ctx, &mut buf, false, true)?;
        Ok(buf.text().to_string())
    }

    pub fn load_model(&mut self, bytes: Vec<u8>) -> LearnResult<()> {
        let mut buf = ModelBuffer::from_bytes(bytes);
        self.save_load(&mut buf, true, false)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WorkspaceSnapshot {
    config: String,
    model: Vec<u8>,
}

impl Checkpointable for Workspace {
    const CHECKPOINT_VERSION: u32 = 1;

    fn save_checkpoint<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        let snapshot = WorkspaceSnapshot {
            config: self.config.to_toml()?,
            model: self.save_model()?.into_bytes(),
        };
        Self::write_snapshot(&snapshot, path)
    }

    fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let snapshot: WorkspaceSnapshot = Self::read_snapshot(path)?;
        let config = LearnerConfig::from_str(&snapshot.config)?;
        let mut workspace = Workspace::new(config)?;
        workspace.load_model(snapshot.model)?;
        Ok(workspace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet(toml: &str) -> LearnerConfig {
        let mut config = LearnerConfig::from_str(toml).unwrap();
        config.run.quiet = true;
        config.weights.sparse = true;
        config
    }

    const IGL: &str = r#"
        [igl]
        experimental_igl = true
    "#;

    #[test]
    fn default_stack_is_coin_under_scorer() {
        let workspace = Workspace::new(quiet("")).unwrap();
        assert_eq!(
            workspace.enabled_reductions(),
            vec!["ftrl-Coin Betting", "scorer-identity"]
        );
        assert_eq!(workspace.hasher().multiplier(), 1);
    }

    #[test]
    fn igl_stack_doubles_the_index_stride() {
        let workspace = Workspace::new(quiet(IGL)).unwrap();
        assert_eq!(
            workspace.enabled_reductions(),
            vec!["ftrl-Coin Betting", "scorer-identity", "cb_adf", "interaction_ground"]
        );
        assert_eq!(workspace.hasher().multiplier(), 2);
        let igl = workspace.interaction_ground().unwrap();
        assert_eq!(igl.borrow().settings().negative_feedback.len(), 1);
    }

    #[test]
    fn decoder_chain_ends_in_the_primary_optimizer() {
        let workspace = Workspace::new(quiet(IGL)).unwrap();
        let igl = workspace.interaction_ground().unwrap().borrow();
        let decoder = LearnerHandle::Single(igl.decoder().clone());
        assert_eq!(decoder.enabled_reductions(), vec!["ftrl-Coin Betting", "scorer-logistic"]);

        let reused = match decoder.find_by_name_prefix(DECODER_REUSE_PREFIX).unwrap() {
            LearnerHandle::Single(node) => node,
            LearnerHandle::Multi(_) => panic!("optimizer is single-line"),
        };
        assert_eq!(
            Rc::as_ptr(&reused) as *const u8,
            Rc::as_ptr(workspace.optimizer()) as *const u8
        );
        assert_eq!(igl.decoder_context().loss, LossFunction::Logistic);
        assert_eq!(workspace.context().loss, LossFunction::Squared);
    }

    #[test]
    fn igl_without_coin_has_no_reuse_target() {
        let err = StackBuilder::new(&quiet(&format!("[optimizer]\nftrl = true\n{IGL}")))
            .setup()
            .err()
            .unwrap();
        match err {
            ConfigError::ReuseTargetMissing { prefix, enabled } => {
                assert_eq!(prefix, "ftrl-Coin");
                assert_eq!(enabled[0], "ftrl-Proximal-FTRL");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn decoder_must_be_logistic() {
        let toml = format!("{IGL}\n[igl.decoder]\nloss_function = \"squared\"\n");
        let err = StackBuilder::new(&quiet(&toml)).setup().err().unwrap();
        assert!(matches!(err, ConfigError::IncompatibleDecoder { .. }));
    }

    #[test]
    fn kept_stages_reuse_an_existing_node() {
        let config = quiet("");
        let primary = StackBuilder::new(&config).setup().unwrap();
        let ftrl = primary.optimizer.unwrap();
        let second = StackBuilder::new(&config)
            .reusing(ftrl.clone())
            .keep(&[StageKind::Scorer])
            .setup()
            .unwrap();
        assert!(second.optimizer.is_none());
        assert_eq!(Rc::strong_count(&ftrl), 3);
    }

    #[test]
    fn entry_point_must_match_root_arity() {
        let mut workspace = Workspace::new(quiet(IGL)).unwrap();
        let err = workspace.learn(&mut Example::new()).unwrap_err();
        assert!(matches!(err, LearnerError::WrongArity { actual: "multi-line" }));

        let mut single = Workspace::new(quiet("")).unwrap();
        let err = single.learn_multi(&mut [Example::new()]).unwrap_err();
        assert!(matches!(err, LearnerError::WrongArity { actual: "single-line" }));
    }
}
