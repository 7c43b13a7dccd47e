//! Wallet preamble written to each target connection

use bytes::Bytes;
use std::path::Path;

use crate::error::PreambleError;

/// Bytes written verbatim to every dialed target before relaying starts
///
/// Cloning is cheap; all forwarding tasks share the same buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preamble(Bytes);

impl Preamble {
    /// A preamble that writes nothing
    pub fn empty() -> Self {
        Self(Bytes::new())
    }

    /// Read the wallet file once
    pub fn load(path: &Path) -> Result<Self, PreambleError> {
        let data = std::fs::read(path).map_err(|source| PreambleError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self(Bytes::from(data)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Bytes> for Preamble {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<&'static [u8]> for Preamble {
    fn from(bytes: &'static [u8]) -> Self {
        Self(Bytes::from_static(bytes))
    }
}
