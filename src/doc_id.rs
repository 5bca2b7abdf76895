use std::fmt;

use serde::{Deserialize, Serialize};

use crate::scope::Scope;

/// A stable document identifier derived from (scope, relative_path).
///
/// The textual form `scope/relative/path` is what callers see and what ties
/// are broken on; it sorts lexicographically.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Generate a stable document ID from scope and relative path.
    ///
    /// Path separators are normalized to `/` so the same tree yields the
    /// same IDs on every platform.
    ///
    /// # Examples
    ///
    /// ```
    /// use docscope::{DocumentId, scope::Scope};
    ///
    /// let id = DocumentId::new(Scope::Notes, "guides/setup.md");
    /// assert_eq!(id.as_str(), "notes/guides/setup.md");
    /// ```
    pub fn new(scope: Scope, relative_path: &str) -> Self {
        let normalized = relative_path.replace('\\', "/");
        let trimmed = normalized.trim_start_matches('/');
        Self(format!("{scope}/{trimmed}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric digest of the ID, stable across builds and platforms.
    pub fn numeric(&self) -> u64 {
        let hash = blake3::hash(self.0.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }

    /// The short hex string for human display (e.g. "a1b2c3").
    pub fn short(&self, len: usize) -> String {
        let len = len.clamp(6, 16);
        let full = format!("{:016x}", self.numeric());
        full[..len].to_string()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
