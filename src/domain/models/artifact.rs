//! The opaque work-product under refinement.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The mutable object refined by the transformation agent (e.g. a system prompt).
///
/// The engine never interprets `content`; it only moves revisions between the
/// agent and the oracle. Each revision supersedes the previous one, so there is
/// no way to address an older revision once `revise` has been called.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    content: String,
    revision: u32,
}

impl Artifact {
    /// Create the seed revision (revision 0).
    pub fn seed(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            revision: 0,
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub const fn revision(&self) -> u32 {
        self.revision
    }

    /// Consume this revision and produce the next one.
    pub fn revise(self, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            revision: self.revision + 1,
        }
    }

    /// Short content hash used to tie reports to the artifact they measured.
    pub fn content_hash(&self) -> String {
        let digest = Sha256::digest(self.content.as_bytes());
        digest
            .iter()
            .take(6)
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revise_advances_revision() {
        let seed = Artifact::seed("v0");
        let next = seed.revise("v1");
        assert_eq!(next.revision(), 1);
        assert_eq!(next.content(), "v1");
        assert_eq!(next.revise("v2").revision(), 2);
    }

    #[test]
    fn content_hash_is_stable() {
        let a = Artifact::seed("same");
        let b = Artifact::seed("same").revise("same");
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), 12);
        assert_ne!(a.content_hash(), Artifact::seed("other").content_hash());
    }
}
