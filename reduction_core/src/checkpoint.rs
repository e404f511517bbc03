//! Checkpoint trait and error handling for deterministic state persistence.
//!
//! This module provides a reusable [`Checkpointable`] trait that enforces a
//! deterministic, versioned serialization contract for learner workspaces.
//! Implementations are responsible for storing a version header alongside the
//! serialized payload so that incompatible files are rejected during load.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use bincode::Options;
use thiserror::Error;

use crate::error::{ConfigError, LearnerError};

/// Errors that can occur while saving or loading checkpoints.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("I/O error while accessing checkpoint: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to (de)serialize checkpoint payload: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Checkpoint version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Checkpoint configuration is unusable: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to replay model state: {0}")]
    Model(#[from] LearnerError),
}

/// Deterministic binary codec options shared by checkpoints and model buffers.
pub(crate) fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_little_endian()
}

/// Components persisted as a version header followed by one payload.
pub trait Checkpointable: Sized {
    /// Header written in front of every payload; files carrying another
    /// value are rejected.
    const CHECKPOINT_VERSION: u32;

    fn save_checkpoint<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError>;

    fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError>;

    /// Write the version header and `payload` with the shared codec,
    /// creating parent directories as needed.
    fn write_snapshot<P, T>(payload: &T, path: P) -> Result<(), CheckpointError>
    where
        P: AsRef<Path>,
        T: serde::Serialize,
    {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut writer = BufWriter::new(File::create(path)?);
        codec().serialize_into(&mut writer, &Self::CHECKPOINT_VERSION)?;
        codec().serialize_into(&mut writer, payload)?;
        writer.flush()?;
        Ok(())
    }

    /// Read a payload written by [`Checkpointable::write_snapshot`].
    fn read_snapshot<P, T>(path: P) -> Result<T, CheckpointError>
    where
        P: AsRef<Path>,
        T: serde::de::DeserializeOwned,
    {
        let mut reader = BufReader::new(File::open(path)?);
        let found: u32 = codec().deserialize_from(&mut reader)?;
        if found != Self::CHECKPOINT_VERSION {
            return Err(CheckpointError::VersionMismatch {
                expected: Self::CHECKPOINT_VERSION,
                found,
            });
        }
        Ok(codec().deserialize_from(&mut reader)?)
    }
}
