//! Error types for stack construction, learning and model persistence.
//!
//! Configuration errors are raised while a stack is being built and abort the
//! run before any example is seen. Learner errors surface from predict/learn
//! calls. Degenerate numeric states are never errors: the update kernels absorb
//! them locally.

use thiserror::Error;

/// Result type alias for stack construction.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type alias for predict/learn/save-load calls.
pub type LearnResult<T> = Result<T, LearnerError>;

/// Fatal configuration errors detected at stack-build time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("You can only use one of 'ftrl', 'pistol', or 'coin' at a time (selected: {})", .selected.join(", "))]
    MultipleOptimizers { selected: Vec<&'static str> },

    #[error("no learner with name prefix '{prefix}' in the stack (enabled: {})", .enabled.join(", "))]
    ReuseTargetMissing { prefix: String, enabled: Vec<String> },

    #[error("decoder stack is incompatible: {reason}")]
    IncompatibleDecoder { reason: String },

    #[error("invalid value for {parameter}: {reason}")]
    InvalidValue { parameter: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by the key-ordered model field codec.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to (de)serialize model field '{field}': {source}")]
    Codec {
        field: String,
        #[source]
        source: bincode::Error,
    },

    #[error("text-mode model dumps are write-only (field '{field}')")]
    TextRead { field: String },

    #[error("expected model field '{expected}', found '{found}'")]
    FieldMismatch { expected: String, found: String },

    #[error("channel width mismatch: store has {expected} channels, model has {found}")]
    WidthMismatch { expected: usize, found: usize },
}

/// Errors raised while driving examples through a learner stack.
#[derive(Debug, Error)]
pub enum LearnerError {
    #[error("{node} expects a {expected} label")]
    LabelMismatch { node: String, expected: &'static str },

    #[error("{node} received an empty batch")]
    EmptyBatch { node: String },

    #[error("the stack root is {actual}; call the {actual} entry point instead")]
    WrongArity { actual: &'static str },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("failed to write progress journal: {0}")]
    Journal(#[from] std::io::Error),
}
