//! FTRL-family optimizer node: the terminal learner of every chain.

use std::fmt;

use tracing::{debug, info};

use crate::context::LearnContext;
use crate::error::{LearnResult, LearnerError};
use crate::example::{foreach_feature, Example, Prediction};
use crate::learner::SingleLearner;
use crate::model_io::ModelBuffer;
use crate::weights::WeightStore;

use super::kernels::{
    coin_predict, coin_update, pistol_predict, pistol_update, proximal_update, sensitivity_term,
    ChannelLayout, CoinChannels, FtrlParams, PistolChannels, ProximalChannels,
};

/// Guard added to the running norm sum before averaging.
const NORM_EPSILON: f64 = 1e-6;

/// Update rule of an optimizer node; exactly one is active per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtrlMode {
    Proximal,
    Pistol,
    CoinBetting,
}

impl FtrlMode {
    pub fn algorithm_name(self) -> &'static str {
        match self {
            FtrlMode::Proximal => "Proximal-FTRL",
            FtrlMode::Pistol => "PiSTOL",
            FtrlMode::CoinBetting => "Coin Betting",
        }
    }

    /// Default `(alpha, beta)`.
    pub fn default_alpha_beta(self) -> (f32, f32) {
        match self {
            FtrlMode::Proximal => (0.005, 0.1),
            FtrlMode::Pistol => (1.0, 0.5),
            FtrlMode::CoinBetting => (4.0, 1.0),
        }
    }

    /// Channels per weight group.
    pub fn width(self) -> usize {
        match self {
            FtrlMode::Proximal => ProximalChannels::WIDTH,
            FtrlMode::Pistol => PistolChannels::WIDTH,
            FtrlMode::CoinBetting => CoinChannels::WIDTH,
        }
    }
}

impl fmt::Display for FtrlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.algorithm_name())
    }
}

pub struct Ftrl {
    name: String,
    mode: FtrlMode,
    params: FtrlParams,
    weights: WeightStore,
    no_win_counter: u32,
    early_stop_thres: u32,
    ftrl_size: u64,
    total_weight: f64,
    normalized_sum_norm_x: f64,
    average_squared_norm_x: f32,
}

impl Ftrl {
    /// `weights` must have been created with `mode.width()` channels.
    pub fn new(
        mode: FtrlMode,
        params: FtrlParams,
        weights: WeightStore,
        early_stop_thres: u32,
        quiet: bool,
    ) -> Self {
        if !quiet {
            info!(
                algorithm = mode.algorithm_name(),
                alpha = params.alpha,
                beta = params.beta,
                "Enabling FTRL based optimization"
            );
        }
        Self {
            name: format!("ftrl-{}", mode.algorithm_name()),
            mode,
            params,
            ftrl_size: weights.width() as u64,
            weights,
            no_win_counter: 0,
            early_stop_thres,
            total_weight: 0.0,
            normalized_sum_norm_x: 0.0,
            average_squared_norm_x: 1.0,
        }
    }

    pub fn mode(&self) -> FtrlMode {
        self.mode
    }

    pub fn params(&self) -> FtrlParams {
        self.params
    }

    pub fn weights(&self) -> &WeightStore {
        &self.weights
    }

    pub fn weights_mut(&mut self) -> &mut WeightStore {
        &mut self.weights
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    pub fn average_squared_norm_x(&self) -> f32 {
        self.average_squared_norm_x
    }

    pub fn no_win_counter(&self) -> u32 {
        self.no_win_counter
    }

    fn finish_prediction(ctx: &LearnContext, ec: &mut Example, raw: f32, generated: usize) {
        ec.num_features_from_interactions = generated;
        ec.partial_prediction = raw;
        ec.pred = Prediction::Scalar(ctx.finalize_prediction(raw));
    }

    /// Plain dot product over the active parameters.
    fn predict_dot(&self, ctx: &LearnContext, ec: &mut Example) {
        let weights = &self.weights;
        let mut dot = 0.0;
        let generated = foreach_feature(ec, &ctx.interactions, |x, index| {
            dot += x * weights.param(index);
        });
        Self::finish_prediction(ctx, ec, dot, generated);
    }

    fn predict_pistol(&mut self, ctx: &LearnContext, ec: &mut Example) {
        let (weights, params) = (&mut self.weights, self.params);
        let mut predict = 0.0;
        let generated = foreach_feature(ec, &ctx.interactions, |x, index| {
            let group = weights.group_mut(index);
            let (next, contribution) = pistol_predict(PistolChannels::load(group), x, &params);
            next.store(group);
            predict += contribution;
        });
        Self::finish_prediction(ctx, ec, predict, generated);
    }

    fn predict_coin(&mut self, ctx: &LearnContext, ec: &mut Example) {
        let (weights, params) = (&self.weights, self.params);
        let mut predict = 0.0;
        let mut normalized_squared_norm_x = 0.0;
        let generated = foreach_feature(ec, &ctx.interactions, |x, index| {
            let channels = weights.group(index).map(CoinChannels::load).unwrap_or_default();
            let contribution = coin_predict(&channels, x, &params);
            predict += contribution.raw;
            normalized_squared_norm_x += contribution.normalized_sq;
        });

        let weight = f64::from(ec.weight);
        self.total_weight += weight;
        self.normalized_sum_norm_x += weight * f64::from(normalized_squared_norm_x);
        self.refresh_average_norm();
        Self::finish_prediction(ctx, ec, predict / self.average_squared_norm_x, generated);
    }

    fn refresh_average_norm(&mut self) {
        self.average_squared_norm_x = if self.total_weight > 0.0 {
            ((self.normalized_sum_norm_x + NORM_EPSILON) / self.total_weight) as f32
        } else {
            1.0
        };
    }

    /// Apply the mode's post-prediction kernel to every feature.
    fn update_after_prediction(&mut self, ctx: &LearnContext, ec: &Example) -> LearnResult<()> {
        let label = ec.simple_label().ok_or_else(|| LearnerError::LabelMismatch {
            node: self.name.clone(),
            expected: "simple",
        })?;
        let update = ctx.loss.first_derivative(&ctx.stats, ec.scalar(), label) * ec.weight;
        let (weights, params, mode) = (&mut self.weights, self.params, self.mode);
        let average = self.average_squared_norm_x;

        foreach_feature(ec, &ctx.interactions, |x, index| {
            let group = weights.group_mut(index);
            match mode {
                FtrlMode::Proximal => {
                    proximal_update(ProximalChannels::load(group), x, update, &params).store(group)
                }
                FtrlMode::Pistol => pistol_update(PistolChannels::load(group), x, update).store(group),
                FtrlMode::CoinBetting => {
                    coin_update(CoinChannels::load(group), x, update, &params, average).store(group)
                }
            }
        });
        Ok(())
    }
}

impl SingleLearner for Ftrl {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&mut self, ctx: &mut LearnContext, ec: &mut Example) -> LearnResult<()> {
        self.predict_dot(ctx, ec);
        Ok(())
    }

    fn learn(&mut self, ctx: &mut LearnContext, ec: &mut Example) -> LearnResult<()> {
        match self.mode {
            FtrlMode::Proximal => self.predict_dot(ctx, ec),
            FtrlMode::Pistol => self.predict_pistol(ctx, ec),
            FtrlMode::CoinBetting => self.predict_coin(ctx, ec),
        }
        self.update_after_prediction(ctx, ec)
    }

    fn update(&mut self, ctx: &mut LearnContext, ec: &mut Example) -> LearnResult<()> {
        self.update_after_prediction(ctx, ec)
    }

    fn sensitivity(&mut self, ctx: &mut LearnContext, ec: &mut Example) -> LearnResult<f32> {
        let (weights, params) = (&self.weights, self.params);
        let mut score = 0.0;
        foreach_feature(ec, &ctx.interactions, |x, index| {
            let sum_sq_grad = weights.group(index).map(|group| group[2]).unwrap_or(0.0);
            score += sensitivity_term(sum_sq_grad, x, &params);
        });
        Ok(score)
    }

    fn save_load(
        &mut self,
        ctx: &mut LearnContext,
        buf: &mut ModelBuffer,
        read: bool,
        text: bool,
    ) -> LearnResult<()> {
        if read {
            self.weights.clear();
        }

        let mut resume = ctx.save_resume;
        buf.field(&mut resume, "resume", read, text)?;

        if resume {
            buf.field(&mut self.total_weight, "ftrl.total_weight", read, text)?;
            buf.field(
                &mut self.normalized_sum_norm_x,
                "ftrl.normalized_sum_norm_x",
                read,
                text,
            )?;
            buf.field(&mut self.ftrl_size, "ftrl.size", read, text)?;
            buf.field(&mut ctx.stats, "shared_data", read, text)?;
        }
        self.weights.save_load(buf, read, text, resume)?;

        if read {
            self.refresh_average_norm();
            debug!(node = %self.name, resume, "model loaded");
        }
        Ok(())
    }

    fn end_pass(&mut self, ctx: &mut LearnContext) -> LearnResult<()> {
        if ctx.holdout_off {
            return Ok(());
        }
        let pass = ctx.current_pass;
        if ctx.stats.summarize_holdout(pass, &mut self.no_win_counter) {
            debug!(
                pass,
                loss = ctx.stats.holdout_best_loss,
                "new best holdout loss"
            );
        }
        let every = ctx.check_holdout_every_n_passes;
        if self.early_stop_thres == self.no_win_counter && (every <= 1 || pass % every == 0) {
            ctx.set_done();
        }
        Ok(())
    }
}
