pub mod dropbox;

use crate::backup::credential::AccessCredential;
use crate::backup::result_error::result::Result;
use std::path::Path;

pub trait Uploader: Send + Sync {
    /// Sends the whole file to `remote_path` in one request. Never retries.
    fn upload(&self, file: &Path, remote_path: &str, credential: &AccessCredential) -> Result<()>;
}

/// Joins the configured remote root and a local file name into an absolute
/// remote path. An empty root means the top of the remote storage.
pub fn remote_path<R: AsRef<str>, F: AsRef<str>>(remote_root: R, file_name: F) -> String {
    let root = remote_root.as_ref().trim_matches('/');
    if root.is_empty() {
        format!("/{}", file_name.as_ref())
    } else {
        format!("/{}/{}", root, file_name.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_path() {
        assert_eq!(remote_path("", "a.enc"), "/a.enc");
        assert_eq!(remote_path("/", "a.enc"), "/a.enc");
        assert_eq!(remote_path("backups", "a.enc"), "/backups/a.enc");
        assert_eq!(remote_path("/backups/server/", "a.enc"), "/backups/server/a.enc");
    }
}
