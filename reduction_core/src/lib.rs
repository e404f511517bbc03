//! # Reduction Core
//!
//! An online learning engine built from composable reductions. Each node
//! adapts a learning problem into a simpler one and delegates to the node
//! below it; the bottom of every chain is an FTRL-family optimizer updating a
//! shared Weight Store one feature at a time.
//!
//! ## Quick Start
//!
//! ```rust
//! use reduction_core::{Example, Label, LearnerConfig, Workspace};
//!
//! let mut config = LearnerConfig::from_str("[weights]\nbits = 12\n").unwrap();
//! config.run.quiet = true;
//! let mut workspace = Workspace::new(config).unwrap();
//!
//! let mut ec = Example::new().with_label(Label::Simple(Some(1.0)));
//! workspace.add_feature(&mut ec, "user", "id=42", 1.0);
//! workspace.learn(&mut ec).unwrap();
//!
//! let mut probe = Example::new();
//! workspace.add_feature(&mut probe, "user", "id=42", 1.0);
//! workspace.predict(&mut probe).unwrap();
//! assert!(probe.scalar() > 0.0);
//! ```
//!
//! ## Core Modules
//!
//! - [`optimizer`] - Proximal-FTRL, PiSTOL and coin-betting update kernels
//! - [`weights`] - Dense and sparse channel-group storage
//! - [`reductions`] - Scorer, contextual bandit and interaction-grounded learning
//! - [`stack`] - Stack builder and the workspace driver
//! - [`config`] - TOML configuration
//! - [`logging`] - JSON line-delimited progress journal

pub mod checkpoint;
pub mod config;
pub mod context;
pub mod error;
pub mod example;
pub mod learner;
pub mod logging;
pub mod loss;
pub mod math;
pub mod model_io;
pub mod optimizer;
pub mod reductions;
pub mod stack;
pub mod weights;

pub use checkpoint::{CheckpointError, Checkpointable};
pub use config::LearnerConfig;
pub use context::{LearnContext, SharedStats};
pub use error::{ConfigError, ConfigResult, LearnResult, LearnerError, ModelError};
pub use example::{
    foreach_feature, ActionScore, CbClass, CbLabel, Example, ExampleType, Feature, FeatureHasher,
    Label, Prediction,
};
pub use learner::{LearnerHandle, MultiLearner, SingleLearner};
pub use logging::{ProgressEntry, ProgressLogger};
pub use loss::{LinkFunction, LossFunction};
pub use model_io::ModelBuffer;
pub use optimizer::{Ftrl, FtrlMode, FtrlParams};
pub use reductions::{CbAdf, IglCounters, IglSettings, InteractionGround, Scorer};
pub use stack::{StackBuilder, StageKind, Workspace};
pub use weights::WeightStore;
