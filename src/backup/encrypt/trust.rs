//! Trust-on-first-use pinning of recipient keys.
//!
//! The first key an identity resolves to is recorded; a later run that resolves
//! the same identity to another key is refused.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
    /// Identity seen for the first time, key now pinned
    Pinned,
    /// Key matches the pinned key
    Matched,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct PinnedKeys {
    #[serde(default)]
    pinned: BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct TrustStore {
    path: PathBuf,
    keys: PinnedKeys,
}

impl TrustStore {
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let keys = if path.exists() {
            let file = std::fs::File::open(&path)?;
            serde_yml::from_reader(file)
                .map_err(Error::from)
                .with_msg(format!("Parse trust store failed: {:?}", path))?
        } else {
            PinnedKeys::default()
        };
        Ok(Self { path, keys })
    }

    pub fn verify_or_pin(&mut self, identity: &str, key: &str) -> Result<TrustDecision> {
        match self.keys.pinned.get(identity) {
            Some(pinned) if pinned == key => Ok(TrustDecision::Matched),
            Some(pinned) => Err(Error::UntrustedRecipient {
                identity: identity.to_string(),
                pinned: pinned.clone(),
                presented: key.to_string(),
            }),
            None => {
                let mut keys = self.keys.clone();
                keys.pinned.insert(identity.to_string(), key.to_string());
                self.save(&keys)?;
                self.keys = keys;
                tracing::info!("Trusting key {} for recipient {:?} on first use", key, identity);
                Ok(TrustDecision::Pinned)
            }
        }
    }

    fn save(&self, keys: &PinnedKeys) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(serde_yml::to_string(keys)?.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_first_use_pins_and_persists() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("trusted.yml");

        let mut store = TrustStore::open(&path).unwrap();
        assert_eq!(
            store.verify_or_pin("a@example.com", "age1one").unwrap(),
            TrustDecision::Pinned
        );

        let reopened = TrustStore::open(&path).unwrap();
        assert_eq!(reopened.keys.pinned.get("a@example.com").map(String::as_str), Some("age1one"));
    }

    #[test]
    fn test_same_key_matches() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = TrustStore::open(temp_dir.path().join("trusted.yml")).unwrap();
        store.verify_or_pin("a@example.com", "age1one").unwrap();

        assert_eq!(
            store.verify_or_pin("a@example.com", "age1one").unwrap(),
            TrustDecision::Matched
        );
    }

    #[test]
    fn test_changed_key_is_refused() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = TrustStore::open(temp_dir.path().join("trusted.yml")).unwrap();
        store.verify_or_pin("a@example.com", "age1one").unwrap();

        let err = store.verify_or_pin("a@example.com", "age1two").unwrap_err();
        assert!(matches!(err, Error::UntrustedRecipient { .. }));
        assert_eq!(store.keys.pinned.get("a@example.com").map(String::as_str), Some("age1one"));
    }

    #[test]
    fn test_failed_save_does_not_pin() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing_dir/trusted.yml");
        let mut store = TrustStore::open(&path).unwrap();

        assert!(store.verify_or_pin("a@example.com", "age1one").is_err());
        assert!(store.keys.pinned.is_empty());
        assert!(store.verify_or_pin("a@example.com", "age1two").is_err());
        assert!(!path.exists());

        std::fs::create_dir(temp_dir.path().join("missing_dir")).unwrap();
        assert_eq!(
            store.verify_or_pin("a@example.com", "age1two").unwrap(),
            TrustDecision::Pinned
        );
    }
}
