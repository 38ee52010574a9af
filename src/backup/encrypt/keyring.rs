//! Resolution of recipient identities to age public keys.
//!
//! Keys are imported out of band into a YAML key ring:
//!
//! ```yaml
//! recipients:
//!   backup@example.com: age1ql3z7hjy54pw3hyww5ayyfg7zqgvc7w3j2elw8zmrj2kg5sfn9aqmcac8p
//! ```

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use age::x25519::Recipient;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

static AGE_KEY_PREFIX: &str = "age1";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecipientKeyRing {
    #[serde(default)]
    recipients: BTreeMap<String, String>,
}

impl RecipientKeyRing {
    /// Reads the key ring; a missing file is an empty key ring.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("No recipient key ring at {:?}", path);
            return Ok(Self::default());
        }
        let file = std::fs::File::open(path)?;
        serde_yml::from_reader(file)
            .map_err(Error::from)
            .with_msg(format!("Parse recipient key ring failed: {:?}", path))
    }

    pub fn insert<I: Into<String>, K: Into<String>>(&mut self, identity: I, key: K) {
        self.recipients.insert(identity.into(), key.into());
    }

    /// A literal `age1…` key resolves to itself, anything else is looked up by name.
    pub fn resolve(&self, identity: &str) -> Result<Recipient> {
        let key = if identity.starts_with(AGE_KEY_PREFIX) {
            identity
        } else {
            self.recipients
                .get(identity)
                .map(String::as_str)
                .ok_or_else(|| Error::InvalidRecipient {
                    identity: identity.to_string(),
                    reason: "no public key imported for this identity".into(),
                })?
        };

        key.trim()
            .parse::<Recipient>()
            .map_err(|e| Error::InvalidRecipient {
                identity: identity.to_string(),
                reason: e.to_string(),
            })
    }
}
