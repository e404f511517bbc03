//! Reductions stacked above the optimizer.

pub mod cb_adf;
pub mod interaction_ground;
pub mod scorer;

pub use cb_adf::CbAdf;
pub use interaction_ground::{IglCounters, IglSettings, InteractionGround};
pub use scorer::Scorer;
