//! Per-feature update kernels.
//!
//! Each optimizer mode views a channel group through a named struct whose
//! field `i` is channel `i` of the group. Kernels are pure: they take the
//! loaded channels and a feature value and return the new channels (plus a
//! prediction contribution where relevant). Degenerate inputs (zero feature
//! magnitude, zero accumulated norms) leave the active parameter at zero.

use crate::math::{corrected_exp, sign};

/// Named view of a channel group.
pub trait ChannelLayout: Copy {
    const WIDTH: usize;

    fn load(group: &[f32]) -> Self;

    fn store(&self, group: &mut [f32]);
}

/// Hyperparameters shared by every kernel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FtrlParams {
    pub alpha: f32,
    pub beta: f32,
    pub l1: f32,
    pub l2: f32,
}

/// Proximal-FTRL channels.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProximalChannels {
    pub param: f32,
    pub z: f32,
    pub sum_sq_grad: f32,
}

impl ChannelLayout for ProximalChannels {
    const WIDTH: usize = 3;

    fn load(group: &[f32]) -> Self {
        Self {
            param: group[0],
            z: group[1],
            sum_sq_grad: group[2],
        }
    }

    fn store(&self, group: &mut [f32]) {
        group[0] = self.param;
        group[1] = self.z;
        group[2] = self.sum_sq_grad;
    }
}

/// PiSTOL channels.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PistolChannels {
    pub param: f32,
    pub z: f32,
    pub sum_abs_grad: f32,
    pub max_abs_x: f32,
}

impl ChannelLayout for PistolChannels {
    const WIDTH: usize = 4;

    fn load(group: &[f32]) -> Self {
        Self {
            param: group[0],
            z: group[1],
            sum_abs_grad: group[2],
            max_abs_x: group[3],
        }
    }

    fn store(&self, group: &mut [f32]) {
        group[0] = self.param;
        group[1] = self.z;
        group[2] = self.sum_abs_grad;
        group[3] = self.max_abs_x;
    }
}

/// Coin-betting channels. `neg_grad_sum` is the running sum of negative
/// gradients; `max_grad` is the Lipschitz estimate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CoinChannels {
    pub param: f32,
    pub neg_grad_sum: f32,
    pub sum_abs_grad: f32,
    pub max_abs_x: f32,
    pub wealth: f32,
    pub max_grad: f32,
}

impl ChannelLayout for CoinChannels {
    const WIDTH: usize = 6;

    fn load(group: &[f32]) -> Self {
        Self {
            param: group[0],
            neg_grad_sum: group[1],
            sum_abs_grad: group[2],
            max_abs_x: group[3],
            wealth: group[4],
            max_grad: group[5],
        }
    }

    fn store(&self, group: &mut [f32]) {
        group[0] = self.param;
        group[1] = self.neg_grad_sum;
        group[2] = self.sum_abs_grad;
        group[3] = self.max_abs_x;
        group[4] = self.wealth;
        group[5] = self.max_grad;
    }
}

/// Proximal step for one feature; `update` is the loss derivative times the
/// example weight.
pub fn proximal_update(w: ProximalChannels, x: f32, update: f32, p: &FtrlParams) -> ProximalChannels {
    let g = update * x;
    let ng2 = w.sum_sq_grad + g * g;
    let sqrt_ng2 = ng2.sqrt();
    let sigma = (sqrt_ng2 - w.sum_sq_grad.sqrt()) / p.alpha;
    let z = w.z + g - sigma * w.param;

    let param = if z.abs() <= p.l1 {
        0.0
    } else {
        (sign(z) * p.l1 - z) / ((p.beta + sqrt_ng2) / p.alpha + p.l2)
    };

    ProximalChannels {
        param,
        z,
        sum_sq_grad: ng2,
    }
}

/// PiSTOL prediction step: widen the magnitude estimate, recompute the
/// parameter from prior statistics only and return it with its
/// contribution `param * x`.
pub fn pistol_predict(w: PistolChannels, x: f32, p: &FtrlParams) -> (PistolChannels, f32) {
    let max_abs_x = w.max_abs_x.max(x.abs());
    let denominator = p.alpha * max_abs_x * (w.sum_abs_grad + max_abs_x);
    let param = if denominator > 0.0 {
        let tmp = 1.0 / denominator;
        let squared_theta = w.z * w.z;
        w.sum_abs_grad.sqrt() * p.beta * w.z * corrected_exp(squared_theta / 2.0 * tmp) * tmp
    } else {
        0.0
    };
    let next = PistolChannels {
        param,
        max_abs_x,
        ..w
    };
    (next, param * x)
}

/// PiSTOL post-update: accumulate gradient statistics only.
pub fn pistol_update(w: PistolChannels, x: f32, update: f32) -> PistolChannels {
    let g = update * x;
    PistolChannels {
        z: w.z - g,
        sum_abs_grad: w.sum_abs_grad + g.abs(),
        ..w
    }
}

/// COCOB bet (unscaled parameter) for a magnitude estimate `max_abs_x`.
pub fn coin_bet(w: &CoinChannels, max_abs_x: f32, p: &FtrlParams) -> f32 {
    let scale = w.max_grad * max_abs_x;
    if scale > 0.0 {
        (p.alpha + w.wealth) / (scale * (scale + w.sum_abs_grad)) * w.neg_grad_sum
    } else {
        0.0
    }
}

/// Per-feature output of the coin-betting prediction step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CoinContribution {
    /// `bet * x`, before example-level normalization.
    pub raw: f32,
    /// `(x / max|x|)^2`, zero when the magnitude estimate is zero.
    pub normalized_sq: f32,
}

/// Coin-betting prediction step. Channels are left untouched; the widened
/// magnitude estimate is local to this call.
pub fn coin_predict(w: &CoinChannels, x: f32, p: &FtrlParams) -> CoinContribution {
    let max_abs_x = w.max_abs_x.max(x.abs());
    let bet = coin_bet(w, max_abs_x, p);
    let normalized_sq = if max_abs_x > 0.0 {
        (x / max_abs_x) * (x / max_abs_x)
    } else {
        0.0
    };
    CoinContribution {
        raw: bet * x,
        normalized_sq,
    }
}

/// Coin-betting post-update.
///
/// Widens the magnitude and Lipschitz estimates, settles the bet placed with
/// the widened estimates against this gradient, then stores the bet implied
/// by the updated statistics divided by `average_squared_norm_x`, so that
/// prediction is a plain dot product.
pub fn coin_update(
    w: CoinChannels,
    x: f32,
    update: f32,
    p: &FtrlParams,
    average_squared_norm_x: f32,
) -> CoinChannels {
    let g = update * x;
    let mut next = w;
    next.max_abs_x = w.max_abs_x.max(x.abs());
    let abs_update = update.abs();
    if abs_update > next.max_grad {
        next.max_grad = abs_update.max(p.beta);
    }

    let bet = coin_bet(&next, next.max_abs_x, p);
    next.neg_grad_sum -= g;
    next.sum_abs_grad += g.abs();
    next.wealth -= g * bet;

    next.param = coin_bet(&next, next.max_abs_x, p) / average_squared_norm_x;
    next
}

/// Inverse-learning-rate sensitivity term of one feature.
pub fn sensitivity_term(sum_sq_grad: f32, x: f32, p: &FtrlParams) -> f32 {
    let uncertain = (p.beta + sum_sq_grad.sqrt()) / p.alpha + p.l2;
    sign(x) / uncertain
}
