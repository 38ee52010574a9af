pub mod keyring;
pub mod trust;

use crate::backup::archive::CollisionPolicy;
use crate::backup::encrypt::keyring::RecipientKeyRing;
use crate::backup::encrypt::trust::TrustStore;
use crate::backup::file_ext::FileExtProvider;
use crate::backup::finish::Finish;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use getset::Getters;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufReader, BufWriter, IntoInnerError};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Output of [`Encryptor::encrypt`]
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct EncryptedArtifact {
    path: PathBuf,
    recipient: String,
}

/// Encrypts archive files for one age X25519 recipient.
///
/// Unless `always_trust` is set, the key an identity resolves to is checked
/// against the trust store and pinned on first use.
#[derive(Debug)]
pub struct Encryptor {
    keyring: RecipientKeyRing,
    trust_store: Mutex<TrustStore>,
    always_trust: bool,
    collision_policy: CollisionPolicy,
}

impl FileExtProvider for Encryptor {
    fn file_ext(&self) -> &'static str {
        "enc"
    }
}

impl Encryptor {
    pub fn new(
        keyring: RecipientKeyRing,
        trust_store: TrustStore,
        always_trust: bool,
        collision_policy: CollisionPolicy,
    ) -> Self {
        Self {
            keyring,
            trust_store: Mutex::new(trust_store),
            always_trust,
            collision_policy,
        }
    }

    /// `{archive}.enc`, next to the archive
    pub fn output_path<P: AsRef<Path>>(&self, archive: P) -> PathBuf {
        let mut name = OsString::from(archive.as_ref().as_os_str());
        name.push(".");
        name.push(self.file_ext());
        PathBuf::from(name)
    }

    /// Encrypts `archive` into its `.enc` sibling.
    ///
    /// The ciphertext is written to a temporary file and renamed only after the
    /// age stream is finished and synced; on any failure nothing with the final
    /// name is created.
    pub fn encrypt<P: AsRef<Path>>(&self, archive: P, identity: &str) -> Result<EncryptedArtifact> {
        let archive = archive.as_ref();
        self.encrypt_file(archive, identity)
            .map_err(|e| Error::encrypt(archive, e))
    }

    fn resolve_recipient(&self, identity: &str) -> Result<age::x25519::Recipient> {
        let recipient = self.keyring.resolve(identity)?;
        if self.always_trust {
            tracing::debug!("Trusting recipient {:?} without verification", identity);
        } else {
            self.trust_store
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .verify_or_pin(identity, &recipient.to_string())?;
        }
        Ok(recipient)
    }

    fn encrypt_file(&self, archive: &Path, identity: &str) -> Result<EncryptedArtifact> {
        let path = self.output_path(archive);
        self.collision_policy.check(&path)?;
        let recipient = self.resolve_recipient(identity)?;

        let mut reader = BufReader::new(File::open(archive)?);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let tmp = tempfile::Builder::new()
            .prefix(".enc.")
            .suffix(".tmp")
            .tempfile_in(dir)?;

        let mut writer =
            age::Encryptor::with_recipients(std::iter::once(&recipient as &dyn age::Recipient))?
                .wrap_output(BufWriter::new(tmp.as_file()))?;
        let bytes = std::io::copy(&mut reader, &mut writer)?;
        Finish::finish(writer)?
            .into_inner()
            .map_err(IntoInnerError::into_error)?;
        tmp.as_file().sync_all()?;

        self.collision_policy.persist(tmp, &path)?;
        tracing::info!(
            "Encrypted {:?} ({} bytes) for {:?} to {:?}",
            archive,
            bytes,
            identity,
            path
        );

        Ok(EncryptedArtifact {
            path,
            recipient: identity.to_string(),
        })
    }
}
