//! Learner configuration via TOML files.
//!
//! Raw serde structs carry the defaults; [`LearnerConfig::from_str`] validates
//! them into the public configuration consumed by the stack builder.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::example::{namespace_index, parse_interactions, NamespaceIndex};
use crate::loss::{LinkFunction, LossFunction};
use crate::optimizer::{FtrlMode, FtrlParams};

/// Complete learner configuration.
///
/// # Examples
///
/// ```
/// use reduction_core::LearnerConfig;
///
/// let config = LearnerConfig::from_str(
///     r#"
///     [optimizer]
///     pistol = true
///
///     [weights]
///     bits = 12
///     "#,
/// )
/// .unwrap();
/// assert_eq!(config.optimizer.params().unwrap().alpha, 1.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearnerConfig {
    pub optimizer: OptimizerConfig,
    pub weights: WeightsConfig,
    pub scorer: ScorerConfig,
    pub features: FeaturesConfig,
    pub run: RunConfig,
    pub cb: CbConfig,
    pub igl: IglConfig,
}

impl LearnerConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_str(&contents)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(toml_str: &str) -> ConfigResult<Self> {
        let raw: RawLearnerConfig =
            toml::from_str(toml_str).map_err(|err| ConfigError::Parse(err.to_string()))?;
        Self::try_from_raw(raw)
    }

    /// Render as TOML that [`LearnerConfig::from_str`] reads back.
    pub fn to_toml(&self) -> ConfigResult<String> {
        toml::to_string(self).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    fn try_from_raw(raw: RawLearnerConfig) -> ConfigResult<Self> {
        let config = Self {
            optimizer: OptimizerConfig::from_raw(raw.optimizer),
            weights: WeightsConfig {
                bits: raw.weights.bits,
                sparse: raw.weights.sparse,
            },
            scorer: ScorerConfig {
                link: raw.scorer.link,
                loss_function: raw.scorer.loss_function,
            },
            features: FeaturesConfig {
                interactions: raw.features.interactions,
            },
            run: RunConfig {
                quiet: raw.run.quiet,
                save_resume: raw.run.save_resume,
                holdout_off: raw.run.holdout_off,
                early_terminate: raw.run.early_terminate,
                check_holdout_every_n_passes: raw.run.check_holdout_every_n_passes,
                progress_log: raw.run.progress_log,
            },
            cb: CbConfig {
                enabled: raw.cb.enabled,
            },
            igl: IglConfig {
                experimental_igl: raw.igl.experimental_igl,
                feedback_namespace: raw.igl.feedback_namespace,
                p_unlabeled_prior: raw.igl.p_unlabeled_prior,
                positive_importance: raw.igl.positive_importance,
                negative_importance: raw.igl.negative_importance,
                negative_feedback: raw.igl.negative_feedback,
                decoder: DecoderConfig {
                    link: raw.igl.decoder.link,
                    loss_function: raw.igl.decoder.loss_function,
                    interactions: raw.igl.decoder.interactions,
                },
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every rule that does not need a built stack.
    pub fn validate(&self) -> ConfigResult<()> {
        self.optimizer.mode()?;
        let params = self.optimizer.params()?;
        if !(params.alpha > 0.0 && params.alpha.is_finite()) {
            return Err(ConfigError::invalid("optimizer.ftrl_alpha", "must be positive"));
        }
        if !(params.beta >= 0.0 && params.beta.is_finite()) {
            return Err(ConfigError::invalid("optimizer.ftrl_beta", "must be non-negative"));
        }
        if self.optimizer.l1_lambda < 0.0 || self.optimizer.l2_lambda < 0.0 {
            return Err(ConfigError::invalid(
                "optimizer.l1_lambda/l2_lambda",
                "must be non-negative",
            ));
        }
        if self.weights.bits == 0 || self.weights.bits > 32 {
            return Err(ConfigError::invalid("weights.bits", "must be in 1..=32"));
        }
        if self.run.check_holdout_every_n_passes == 0 {
            return Err(ConfigError::invalid(
                "run.check_holdout_every_n_passes",
                "must be at least 1",
            ));
        }
        self.features.parsed()?;

        let igl = &self.igl;
        if igl.experimental_igl {
            if igl.feedback_namespace.is_empty() {
                return Err(ConfigError::invalid("igl.feedback_namespace", "must not be empty"));
            }
            if !(igl.p_unlabeled_prior > 0.0 && igl.p_unlabeled_prior <= 1.0) {
                return Err(ConfigError::invalid("igl.p_unlabeled_prior", "must be in (0, 1]"));
            }
            if igl.positive_importance <= 0.0 || igl.negative_importance <= 0.0 {
                return Err(ConfigError::invalid(
                    "igl.positive_importance/negative_importance",
                    "must be positive",
                ));
            }
            if let Some(interactions) = &igl.decoder.interactions {
                parse_interactions(interactions)?;
            }
        }
        Ok(())
    }

    /// Whether the multi-line contextual-bandit node is part of the stack.
    pub fn cb_enabled(&self) -> bool {
        self.cb.enabled || self.igl.experimental_igl
    }

    /// Configuration of the decoder chain built under the IGL node.
    pub fn decoder_config(&self) -> LearnerConfig {
        let decoder = &self.igl.decoder;
        LearnerConfig {
            optimizer: self.optimizer.clone(),
            weights: self.weights.clone(),
            scorer: ScorerConfig {
                link: decoder.link,
                loss_function: decoder.loss_function,
            },
            features: FeaturesConfig {
                interactions: decoder
                    .interactions
                    .clone()
                    .unwrap_or_else(|| self.features.interactions.clone()),
            },
            run: RunConfig {
                quiet: true,
                progress_log: String::new(),
                ..self.run.clone()
            },
            cb: CbConfig { enabled: false },
            igl: IglConfig {
                experimental_igl: false,
                ..self.igl.clone()
            },
        }
    }
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerConfig::from_raw(RawOptimizer::default()),
            weights: WeightsConfig {
                bits: default_bits(),
                sparse: false,
            },
            scorer: ScorerConfig {
                link: LinkFunction::Identity,
                loss_function: LossFunction::Squared,
            },
            features: FeaturesConfig::default(),
            run: RunConfig {
                quiet: false,
                save_resume: true,
                holdout_off: true,
                early_terminate: default_early_terminate(),
                check_holdout_every_n_passes: 1,
                progress_log: String::new(),
            },
            cb: CbConfig { enabled: false },
            igl: IglConfig {
                experimental_igl: false,
                feedback_namespace: default_feedback_namespace(),
                p_unlabeled_prior: default_p_unlabeled_prior(),
                positive_importance: default_positive_importance(),
                negative_importance: default_negative_importance(),
                negative_feedback: default_negative_feedback(),
                decoder: DecoderConfig {
                    link: LinkFunction::Logistic,
                    loss_function: LossFunction::Logistic,
                    interactions: None,
                },
            },
        }
    }
}

/// Optimizer mode flags and hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizerConfig {
    pub ftrl: bool,
    pub pistol: bool,
    pub coin: bool,
    /// Mode default when absent.
    pub ftrl_alpha: Option<f32>,
    pub ftrl_beta: Option<f32>,
    pub l1_lambda: f32,
    pub l2_lambda: f32,
}

impl OptimizerConfig {
    fn from_raw(raw: RawOptimizer) -> Self {
        Self {
            ftrl: raw.ftrl,
            pistol: raw.pistol,
            coin: raw.coin,
            ftrl_alpha: raw.ftrl_alpha,
            ftrl_beta: raw.ftrl_beta,
            l1_lambda: raw.l1_lambda,
            l2_lambda: raw.l2_lambda,
        }
    }

    /// The single selected update mode; coin betting when none is selected.
    pub fn mode(&self) -> ConfigResult<FtrlMode> {
        let selected: Vec<&'static str> = [
            (self.ftrl, "ftrl"),
            (self.pistol, "pistol"),
            (self.coin, "coin"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect();

        match selected.as_slice() {
            [] | ["coin"] => Ok(FtrlMode::CoinBetting),
            ["ftrl"] => Ok(FtrlMode::Proximal),
            ["pistol"] => Ok(FtrlMode::Pistol),
            _ => Err(ConfigError::MultipleOptimizers { selected }),
        }
    }

    pub fn params(&self) -> ConfigResult<FtrlParams> {
        let (alpha, beta) = self.mode()?.default_alpha_beta();
        Ok(FtrlParams {
            alpha: self.ftrl_alpha.unwrap_or(alpha),
            beta: self.ftrl_beta.unwrap_or(beta),
            l1: self.l1_lambda,
            l2: self.l2_lambda,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightsConfig {
    pub bits: u32,
    pub sparse: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScorerConfig {
    pub link: LinkFunction,
    pub loss_function: LossFunction,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeaturesConfig {
    pub interactions: Vec<String>,
}

impl FeaturesConfig {
    pub fn parsed(&self) -> ConfigResult<Vec<Vec<NamespaceIndex>>> {
        parse_interactions(&self.interactions)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunConfig {
    pub quiet: bool,
    pub save_resume: bool,
    pub holdout_off: bool,
    /// Passes without holdout improvement before stopping.
    pub early_terminate: u32,
    pub check_holdout_every_n_passes: u64,
    /// JSON-lines progress journal; empty disables it.
    pub progress_log: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CbConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IglConfig {
    pub experimental_igl: bool,
    pub feedback_namespace: String,
    pub p_unlabeled_prior: f32,
    pub positive_importance: f32,
    pub negative_importance: f32,
    /// Feedback tokens (hashed in the feedback namespace) that are negative.
    pub negative_feedback: Vec<String>,
    pub decoder: DecoderConfig,
}

impl IglConfig {
    pub fn feedback_namespace_index(&self) -> NamespaceIndex {
        namespace_index(&self.feedback_namespace)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecoderConfig {
    pub link: LinkFunction,
    pub loss_function: LossFunction,
    /// Falls back to the primary interactions when absent.
    pub interactions: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLearnerConfig {
    #[serde(default)]
    optimizer: RawOptimizer,
    #[serde(default)]
    weights: RawWeights,
    #[serde(default)]
    scorer: RawScorer,
    #[serde(default)]
    features: RawFeatures,
    #[serde(default)]
    run: RawRun,
    #[serde(default)]
    cb: RawCb,
    #[serde(default)]
    igl: RawIgl,
}

#[derive(Debug, Default, Deserialize)]
struct RawOptimizer {
    #[serde(default)]
    ftrl: bool,
    #[serde(default)]
    pistol: bool,
    #[serde(default)]
    coin: bool,
    #[serde(default)]
    ftrl_alpha: Option<f32>,
    #[serde(default)]
    ftrl_beta: Option<f32>,
    #[serde(default)]
    l1_lambda: f32,
    #[serde(default)]
    l2_lambda: f32,
}

#[derive(Debug, Deserialize)]
struct RawWeights {
    #[serde(default = "default_bits")]
    bits: u32,
    #[serde(default)]
    sparse: bool,
}

impl Default for RawWeights {
    fn default() -> Self {
        Self {
            bits: default_bits(),
            sparse: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawScorer {
    #[serde(default)]
    link: LinkFunction,
    #[serde(default)]
    loss_function: LossFunction,
}

#[derive(Debug, Default, Deserialize)]
struct RawFeatures {
    #[serde(default)]
    interactions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawRun {
    #[serde(default)]
    quiet: bool,
    #[serde(default = "default_true")]
    save_resume: bool,
    #[serde(default = "default_true")]
    holdout_off: bool,
    #[serde(default = "default_early_terminate")]
    early_terminate: u32,
    #[serde(default = "default_check_every")]
    check_holdout_every_n_passes: u64,
    #[serde(default)]
    progress_log: String,
}

impl Default for RawRun {
    fn default() -> Self {
        Self {
            quiet: false,
            save_resume: true,
            holdout_off: true,
            early_terminate: default_early_terminate(),
            check_holdout_every_n_passes: default_check_every(),
            progress_log: String::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawCb {
    #[serde(default)]
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct RawIgl {
    #[serde(default)]
    experimental_igl: bool,
    #[serde(default = "default_feedback_namespace")]
    feedback_namespace: String,
    #[serde(default = "default_p_unlabeled_prior")]
    p_unlabeled_prior: f32,
    #[serde(default = "default_positive_importance")]
    positive_importance: f32,
    #[serde(default = "default_negative_importance")]
    negative_importance: f32,
    #[serde(default = "default_negative_feedback")]
    negative_feedback: Vec<String>,
    #[serde(default)]
    decoder: RawDecoder,
}

impl Default for RawIgl {
    fn default() -> Self {
        Self {
            experimental_igl: false,
            feedback_namespace: default_feedback_namespace(),
            p_unlabeled_prior: default_p_unlabeled_prior(),
            positive_importance: default_positive_importance(),
            negative_importance: default_negative_importance(),
            negative_feedback: default_negative_feedback(),
            decoder: RawDecoder::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDecoder {
    #[serde(default = "default_decoder_link")]
    link: LinkFunction,
    #[serde(default = "default_decoder_loss")]
    loss_function: LossFunction,
    #[serde(default)]
    interactions: Option<Vec<String>>,
}

impl Default for RawDecoder {
    fn default() -> Self {
        Self {
            link: default_decoder_link(),
            loss_function: default_decoder_loss(),
            interactions: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_bits() -> u32 {
    18
}

fn default_early_terminate() -> u32 {
    3
}

fn default_check_every() -> u64 {
    1
}

fn default_feedback_namespace() -> String {
    "F".to_string()
}

fn default_p_unlabeled_prior() -> f32 {
    0.5
}

fn default_positive_importance() -> f32 {
    1.0
}

fn default_negative_importance() -> f32 {
    0.5
}

fn default_negative_feedback() -> Vec<String> {
    vec!["dislike".to_string()]
}

fn default_decoder_link() -> LinkFunction {
    LinkFunction::Logistic
}

fn default_decoder_loss() -> LossFunction {
    LossFunction::Logistic
}
