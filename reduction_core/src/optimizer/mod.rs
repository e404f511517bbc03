//! Online optimizers.
//!
//! [`kernels`] holds the per-feature update rules; [`ftrl`] wraps them into
//! the terminal learner node that owns the Weight Store.

pub mod ftrl;
pub mod kernels;

pub use ftrl::{Ftrl, FtrlMode};
pub use kernels::{ChannelLayout, CoinChannels, FtrlParams, PistolChannels, ProximalChannels};
