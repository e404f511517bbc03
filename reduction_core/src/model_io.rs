//! Key-ordered model field buffer used by every node's `save_load`.
//!
//! Fields are written in a fixed, node-declared order. Each binary field
//! carries its name so that a reader walking a different order fails loudly
//! instead of silently reinterpreting bytes. Text mode renders a readable
//! `name = value` dump and is write-only.

use std::fmt::{self, Debug, Write as _};

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::checkpoint::codec;
use crate::error::ModelError;

/// In-memory model image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelBuffer {
    bytes: Vec<u8>,
    position: usize,
    text: String,
}

impl ModelBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap bytes previously produced by [`ModelBuffer::into_bytes`].
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            position: 0,
            text: String::new(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Human-readable dump accumulated by text-mode writes.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Restart reading from the first field.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    pub fn write_model_field<T>(&mut self, value: &T, name: &str, text: bool) -> Result<(), ModelError>
    where
        T: Serialize + Debug,
    {
        if text {
            // Writing into a String cannot fail.
            let _ = writeln!(self.text, "{name} = {value:?}");
            return Ok(());
        }
        codec()
            .serialize_into(&mut self.bytes, &(name, value))
            .map_err(|source| ModelError::Codec {
                field: name.to_string(),
                source,
            })
    }

    pub fn read_model_field<T>(&mut self, name: &str) -> Result<T, ModelError>
    where
        T: DeserializeOwned,
    {
        let mut cursor = &self.bytes[self.position..];
        let (found, value): (String, T) =
            codec()
                .deserialize_from(&mut cursor)
                .map_err(|source| ModelError::Codec {
                    field: name.to_string(),
                    source,
                })?;
        if found != name {
            return Err(ModelError::FieldMismatch {
                expected: name.to_string(),
                found,
            });
        }
        self.position = self.bytes.len() - cursor.len();
        Ok(value)
    }

    /// Read into or write from `value` depending on `read`.
    pub fn field<T>(&mut self, value: &mut T, name: &str, read: bool, text: bool) -> Result<(), ModelError>
    where
        T: Serialize + DeserializeOwned + Debug,
    {
        if read {
            if text {
                return Err(ModelError::TextRead {
                    field: name.to_string(),
                });
            }
            *value = self.read_model_field(name)?;
            Ok(())
        } else {
            self.write_model_field(value, name, text)
        }
    }
}

impl fmt::Display for ModelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.text.is_empty() {
            write!(f, "<{} model bytes>", self.bytes.len())
        } else {
            f.write_str(&self.text)
        }
    }
}
