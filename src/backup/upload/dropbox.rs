use crate::backup::credential::AccessCredential;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::upload::Uploader;
use bon::Builder;
use reqwest::blocking::Body;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use std::fs::File;
use std::path::Path;

/// Dropbox content API host
pub static DEFAULT_CONTENT_URL: &str = "https://content.dropboxapi.com";

/// Largest file accepted by a single `files/upload` call
pub static MAX_SINGLE_UPLOAD_BYTES: u64 = 150 * 1024 * 1024;

#[derive(Serialize)]
struct UploadArg<'a> {
    path: &'a str,
    mode: &'a str,
    autorename: bool,
    mute: bool,
}

/// Uploads through the Dropbox `files/upload` endpoint, replacing any file
/// already at the remote path.
#[derive(Debug, Builder)]
pub struct DropboxUploader {
    #[builder(default)]
    client: reqwest::blocking::Client,
    #[builder(default = DEFAULT_CONTENT_URL.to_string(), into)]
    content_url: String,
    #[builder(default = MAX_SINGLE_UPLOAD_BYTES)]
    max_upload_bytes: u64,
}

impl Uploader for DropboxUploader {
    fn upload(&self, file: &Path, remote_path: &str, credential: &AccessCredential) -> Result<()> {
        self.send(file, remote_path, credential)
            .map_err(|e| Error::upload(file, e))
    }
}

impl DropboxUploader {
    fn send(&self, file: &Path, remote_path: &str, credential: &AccessCredential) -> Result<()> {
        let size = std::fs::metadata(file)?.len();
        if size > self.max_upload_bytes {
            return Err(Error::FileTooLarge {
                size,
                limit: self.max_upload_bytes,
            });
        }

        let arg = header_safe_json(&UploadArg {
            path: remote_path,
            mode: "overwrite",
            autorename: false,
            mute: true,
        })?;

        tracing::info!("Uploading {:?} ({} bytes) to {:?}", file, size, remote_path);
        let response = self
            .client
            .post(format!("{}/2/files/upload", self.content_url.trim_end_matches('/')))
            .bearer_auth(credential.token().inner())
            .header("Dropbox-API-Arg", arg)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(Body::sized(File::open(file)?, size))
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }
        tracing::debug!("Dropbox accepted {:?}", remote_path);
        Ok(())
    }
}

/// JSON for an HTTP header value: every non-ASCII character is escaped as
/// `\uXXXX`, since header values must stay ASCII.
fn header_safe_json<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_string(value)?;
    let mut escaped = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() {
            escaped.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                escaped.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    Ok(escaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use mockito::Matcher;
    use tempfile::TempDir;

    fn credential() -> AccessCredential {
        AccessCredential::new("sl.access-token", Utc::now(), Duration::hours(4))
    }

    fn uploader(server: &mockito::ServerGuard) -> DropboxUploader {
        DropboxUploader::builder().content_url(server.url()).build()
    }

    #[test]
    fn test_upload_sends_file_with_bearer_token() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("2024-03-09_alpha.tar.gz.enc");
        std::fs::write(&file, "ciphertext bytes").unwrap();

        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/2/files/upload")
            .match_header("authorization", "Bearer sl.access-token")
            .match_header("content-type", "application/octet-stream")
            .match_header(
                "dropbox-api-arg",
                r#"{"path":"/backups/2024-03-09_alpha.tar.gz.enc","mode":"overwrite","autorename":false,"mute":true}"#,
            )
            .match_body("ciphertext bytes")
            .with_status(200)
            .with_body(r#"{"name":"2024-03-09_alpha.tar.gz.enc"}"#)
            .expect(1)
            .create();

        uploader(&server)
            .upload(
                &file,
                "/backups/2024-03-09_alpha.tar.gz.enc",
                &credential(),
            )
            .unwrap();
        mock.assert();
    }

    #[test]
    fn test_upload_error_carries_api_detail() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("a.enc");
        std::fs::write(&file, "x").unwrap();

        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/2/files/upload")
            .with_status(409)
            .with_body(r#"{"error_summary":"path/insufficient_space/"}"#)
            .expect(1)
            .create();

        let err = uploader(&server)
            .upload(&file, "/a.enc", &credential())
            .unwrap_err();
        match &err {
            Error::Upload { path, error } => {
                assert_eq!(path, &file);
                assert!(matches!(**error, Error::HttpStatus { status: 409, .. }));
            }
            other => panic!("Expected Upload error, got {other}"),
        }
        assert!(err.to_string().contains("insufficient_space"));
        assert!(!err.is_transient());
        mock.assert();
    }

    #[test]
    fn test_oversized_file_is_rejected_without_request() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("big.enc");
        std::fs::write(&file, vec![0u8; 64]).unwrap();

        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create();

        let err = DropboxUploader::builder()
            .content_url(server.url())
            .max_upload_bytes(16)
            .build()
            .upload(&file, "/big.enc", &credential())
            .unwrap_err();
        match err {
            Error::Upload { error, .. } => {
                assert!(matches!(*error, Error::FileTooLarge { size: 64, limit: 16 }))
            }
            other => panic!("Expected Upload error, got {other}"),
        }
        mock.assert();
    }

    #[test]
    fn test_missing_file_is_upload_error() {
        let temp_dir = TempDir::new().unwrap();
        let server = mockito::Server::new();

        let err = uploader(&server)
            .upload(&temp_dir.path().join("gone.enc"), "/gone.enc", &credential())
            .unwrap_err();
        assert!(matches!(err, Error::Upload { .. }));
    }

    #[test]
    fn test_header_safe_json_escapes_non_ascii() {
        let arg = UploadArg {
            path: "/Fotos/2024-03-09_café.tar.gz.enc",
            mode: "overwrite",
            autorename: false,
            mute: true,
        };
        let json = header_safe_json(&arg).unwrap();

        assert!(json.is_ascii());
        assert!(json.contains(r"caf\u00e9"));
    }
}
