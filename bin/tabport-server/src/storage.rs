//! Filesystem artifact sink with signed download URLs.
//!
//! Objects live under `{root}/exports/`. Keys are relative paths of the form
//! `exports/{yyyyMMdd_HHmmss}_{short id}_{file name}`; the short id keeps two
//! same-second uploads of one file name apart.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::Bytes;
use chrono::{Local, Utc};
use hmac::digest::InvalidLength;
use hmac::{Hmac, KeyInit, Mac};
use sha2::Sha256;
use tabport_core::workbook::xlsx;
use tabport_core::{ArtifactSink, SinkError};
use thiserror::Error;
use tracing::debug;

const PREFIX: &str = "exports";

type HmacSha256 = Hmac<Sha256>;

/// Why a presigned URL was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("link expired")]
    Expired,
    #[error("invalid signature")]
    Invalid,
}

/// Produces and checks `expires`/`signature` query pairs.
#[derive(Clone)]
pub struct UrlSigner {
    public_url: String,
    /// Keyed with the signing secret; cloned per signature.
    mac: HmacSha256,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("public_url", &self.public_url)
            .finish_non_exhaustive()
    }
}

impl UrlSigner {
    pub fn new(public_url: impl Into<String>, secret: impl AsRef<[u8]>) -> Result<Self, InvalidLength> {
        Ok(Self {
            public_url: public_url.into().trim_end_matches('/').to_owned(),
            mac: HmacSha256::new_from_slice(secret.as_ref())?,
        })
    }

    fn mac_for(&self, key: &str, expires: i64) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac
    }

    /// HMAC-SHA256 over key and expiry, URL-safe base64 without padding.
    pub fn signature(&self, key: &str, expires: i64) -> String {
        URL_SAFE_NO_PAD.encode(self.mac_for(key, expires).finalize().into_bytes())
    }

    pub fn url(&self, key: &str, ttl: Duration) -> String {
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires = Utc::now().timestamp().saturating_add(ttl);
        format!(
            "{}/v1/artifacts/{key}?expires={expires}&signature={}",
            self.public_url,
            self.signature(key, expires)
        )
    }

    /// The signature is checked in constant time before the expiry.
    pub fn verify(&self, key: &str, expires: i64, signature: &str, now: i64) -> Result<(), SignatureError> {
        let tag = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| SignatureError::Invalid)?;
        self.mac_for(key, expires)
            .verify_slice(&tag)
            .map_err(|_| SignatureError::Invalid)?;
        if now > expires {
            return Err(SignatureError::Expired);
        }
        Ok(())
    }
}

/// [`ArtifactSink`] backed by a local directory.
#[derive(Debug, Clone)]
pub struct LocalArtifactSink {
    root: PathBuf,
    signer: UrlSigner,
}

impl LocalArtifactSink {
    pub fn new(root: impl Into<PathBuf>, signer: UrlSigner) -> Self {
        Self {
            root: root.into(),
            signer,
        }
    }

    pub fn signer(&self) -> &UrlSigner {
        &self.signer
    }

    /// The original file name embedded in `key`.
    pub fn file_name(key: &str) -> &str {
        let last = key.rsplit('/').next().unwrap_or(key);
        last.splitn(4, '_').nth(3).unwrap_or(last)
    }

    /// Content type implied by the key's extension.
    pub fn content_type(key: &str) -> &'static str {
        if key.ends_with(".xlsx") {
            xlsx::CONTENT_TYPE
        } else {
            "application/octet-stream"
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, SinkError> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && !key.contains('\\')
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(SinkError::InvalidKey(key.to_owned()));
        }
        Ok(self.root.join(relative))
    }
}

/// Keep only characters that are safe in a path segment and a URL.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "artifact".to_owned()
    } else {
        cleaned.to_owned()
    }
}

fn io_error(key: &str, err: std::io::Error) -> SinkError {
    if err.kind() == std::io::ErrorKind::NotFound {
        SinkError::NotFound(key.to_owned())
    } else {
        SinkError::unavailable(err)
    }
}

impl ArtifactSink for LocalArtifactSink {
    async fn put(&self, bytes: Bytes, suggested_name: &str, _content_type: &str) -> Result<String, SinkError> {
        let short = uuid::Uuid::new_v4().simple().to_string();
        let key = format!(
            "{PREFIX}/{}_{}_{}",
            Local::now().format("%Y%m%d_%H%M%S"),
            &short[..8],
            sanitize(suggested_name)
        );
        let path = self.path_for(&key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(SinkError::unavailable)?;
        }

        // Write then rename so readers never see a partial object.
        let partial = path.with_extension("part");
        tokio::fs::write(&partial, &bytes).await.map_err(SinkError::unavailable)?;
        tokio::fs::rename(&partial, &path).await.map_err(SinkError::unavailable)?;
        debug!(artifact_key = %key, size = bytes.len(), "artifact stored");
        Ok(key)
    }

    async fn get(&self, key: &str) -> Result<Bytes, SinkError> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| io_error(key, e))
    }

    async fn exists(&self, key: &str) -> Result<bool, SinkError> {
        let path = self.path_for(key)?;
        tokio::fs::try_exists(&path).await.map_err(SinkError::unavailable)
    }

    async fn delete(&self, key: &str) -> Result<(), SinkError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SinkError::unavailable(e)),
        }
    }

    async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String, SinkError> {
        if !self.exists(key).await? {
            return Err(SinkError::NotFound(key.to_owned()));
        }
        Ok(self.signer.url(key, ttl))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::Scratch;

    fn sink() -> (Scratch, LocalArtifactSink) {
        let scratch = Scratch::new("sink");
        let signer = UrlSigner::new("http://files.test/", "s3cret").unwrap();
        let sink = LocalArtifactSink::new(scratch.path(), signer);
        (scratch, sink)
    }

    #[test]
    fn sanitize_strips_path_tricks() {
        assert_eq!(sanitize("report 1.xlsx"), "report_1.xlsx");
        assert_eq!(sanitize("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize("..."), "artifact");
    }

    #[test]
    fn signatures_verify_and_expire() {
        let signer = UrlSigner::new("http://x", "secret").unwrap();
        let sig = signer.signature("exports/a.xlsx", 100);
        assert!(!sig.contains('=') && !sig.contains('+') && !sig.contains('/'));

        assert_eq!(signer.verify("exports/a.xlsx", 100, &sig, 50), Ok(()));
        assert_eq!(signer.verify("exports/a.xlsx", 100, &sig, 101), Err(SignatureError::Expired));
        assert_eq!(signer.verify("exports/b.xlsx", 100, &sig, 50), Err(SignatureError::Invalid));
        assert_eq!(signer.verify("exports/a.xlsx", 200, &sig, 50), Err(SignatureError::Invalid));

        let other = UrlSigner::new("http://x", "other").unwrap();
        assert_eq!(other.verify("exports/a.xlsx", 100, &sig, 50), Err(SignatureError::Invalid));
    }

    #[test]
    fn malformed_or_truncated_signatures_are_invalid() {
        let signer = UrlSigner::new("http://x", "secret").unwrap();
        let sig = signer.signature("exports/a.xlsx", 100);
        // A SHA-256 HMAC tag is 32 bytes.
        assert_eq!(URL_SAFE_NO_PAD.decode(&sig).unwrap().len(), 32);

        let padded = format!("{sig}AA");
        let candidates: [&str; 4] = ["", "not base64!", &sig[..sig.len() - 4], &padded];
        for bad in candidates {
            assert_eq!(
                signer.verify("exports/a.xlsx", 100, bad, 50),
                Err(SignatureError::Invalid),
                "{bad:?}"
            );
        }
    }

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let (_scratch, sink) = sink();
        let key = sink
            .put(Bytes::from_static(b"PK"), "employees_export_x.xlsx", xlsx::CONTENT_TYPE)
            .await
            .unwrap();
        assert!(key.starts_with("exports/"));
        assert_eq!(LocalArtifactSink::file_name(&key), "employees_export_x.xlsx");
        assert_eq!(LocalArtifactSink::content_type(&key), xlsx::CONTENT_TYPE);

        assert!(sink.exists(&key).await.unwrap());
        assert_eq!(sink.get(&key).await.unwrap(), Bytes::from_static(b"PK"));

        let url = sink.presigned_url(&key, Duration::from_secs(60)).await.unwrap();
        assert!(url.starts_with(&format!("http://files.test/v1/artifacts/{key}?expires=")));
        assert!(url.contains("&signature="));

        sink.delete(&key).await.unwrap();
        sink.delete(&key).await.unwrap();
        assert!(!sink.exists(&key).await.unwrap());
        assert!(matches!(sink.get(&key).await, Err(SinkError::NotFound(_))));
        assert!(matches!(
            sink.presigned_url(&key, Duration::from_secs(60)).await,
            Err(SinkError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn keys_are_unique_for_same_name() {
        let (_scratch, sink) = sink();
        let a = sink.put(Bytes::from_static(b"a"), "same.xlsx", "x").await.unwrap();
        let b = sink.put(Bytes::from_static(b"b"), "same.xlsx", "x").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(sink.get(&a).await.unwrap(), Bytes::from_static(b"a"));
    }

    #[tokio::test]
    async fn escaping_keys_are_rejected() {
        let (_scratch, sink) = sink();
        for key in ["../secret", "/etc/passwd", "exports/../../x", "", "a\\b"] {
            assert!(matches!(sink.get(key).await, Err(SinkError::InvalidKey(_))), "{key}");
        }
    }
}
