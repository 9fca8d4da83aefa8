//! Sender allow-list. Immutable after load, so reads need no lock
//! (SPEC_FULL.md §4.4-adjacent / §5 "SenderPolicy: immutable after load").

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone)]
pub struct SenderPolicy {
    allowed: Option<HashSet<String>>,
}

impl SenderPolicy {
    /// No allow-list configured: every sender is authorized.
    pub fn disabled() -> Self {
        Self { allowed: None }
    }

    /// Load a plain-text allow-list: one phone number per line, `#`
    /// comments and blank lines ignored.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read allowed-senders file: {}", path.display()))?;

        let allowed: HashSet<String> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();

        info!("loaded {} allowed senders from {}", allowed.len(), path.display());
        Ok(Self {
            allowed: Some(allowed),
        })
    }

    pub fn is_authorization_required(&self) -> bool {
        self.allowed.is_some()
    }

    pub fn is_allowed(&self, sender: &str) -> bool {
        match &self.allowed {
            None => true,
            Some(set) => set.contains(sender),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn disabled_allows_everyone() {
        let policy = SenderPolicy::disabled();
        assert!(!policy.is_authorization_required());
        assert!(policy.is_allowed("anyone"));
    }

    #[test]
    fn loaded_list_allows_only_listed_senders() {
        let f = write_tmp("A\nB\n# comment\n\nC\n");
        let policy = SenderPolicy::load(f.path()).unwrap();
        assert!(policy.is_authorization_required());
        assert!(policy.is_allowed("A"));
        assert!(policy.is_allowed("C"));
        assert!(!policy.is_allowed("D"));
    }

    #[test]
    fn comments_and_blanks_only_rejects_everyone() {
        let f = write_tmp("# just comments\n\n\n# another\n");
        let policy = SenderPolicy::load(f.path()).unwrap();
        assert!(policy.is_authorization_required());
        assert!(!policy.is_allowed("A"));
        assert!(!policy.is_allowed(""));
    }
}
