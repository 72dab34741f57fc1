//! Durable artifact storage.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum SinkError {
    /// The backend could not be reached or refused the operation.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),
}

impl SinkError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        SinkError::Unavailable(err.to_string())
    }
}

/// Object storage for finished artifacts.
///
/// Objects are write-once: `put` always allocates a fresh key. `delete` is
/// idempotent and succeeds when the object is already gone.
pub trait ArtifactSink: Send + Sync + 'static {
    fn put(
        &self,
        bytes: Bytes,
        suggested_name: &str,
        content_type: &str,
    ) -> impl Future<Output = Result<String, SinkError>> + Send;

    fn get(&self, key: &str) -> impl Future<Output = Result<Bytes, SinkError>> + Send;

    fn exists(&self, key: &str) -> impl Future<Output = Result<bool, SinkError>> + Send;

    fn delete(&self, key: &str) -> impl Future<Output = Result<(), SinkError>> + Send;

    /// A time-limited URL that serves `key` without further authentication.
    fn presigned_url(&self, key: &str, ttl: Duration) -> impl Future<Output = Result<String, SinkError>> + Send;
}

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Bytes,
    content_type: String,
}

/// In-memory sink with switchable failure for exercising error paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryArtifactSink {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
    next_id: Arc<AtomicU64>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryArtifactSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with [`SinkError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.objects.read().await.get(key).map(|o| o.content_type.clone())
    }

    fn check(&self) -> Result<(), SinkError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("memory sink switched off".into()));
        }
        Ok(())
    }
}

impl ArtifactSink for MemoryArtifactSink {
    async fn put(&self, bytes: Bytes, suggested_name: &str, content_type: &str) -> Result<String, SinkError> {
        self.check()?;
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        let key = format!("exports/{n:06}_{suggested_name}");
        self.objects.write().await.insert(
            key.clone(),
            StoredObject {
                bytes,
                content_type: content_type.to_owned(),
            },
        );
        Ok(key)
    }

    async fn get(&self, key: &str) -> Result<Bytes, SinkError> {
        self.check()?;
        self.objects
            .read()
            .await
            .get(key)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| SinkError::NotFound(key.to_owned()))
    }

    async fn exists(&self, key: &str) -> Result<bool, SinkError> {
        self.check()?;
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<(), SinkError> {
        self.check()?;
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String, SinkError> {
        self.check()?;
        if !self.objects.read().await.contains_key(key) {
            return Err(SinkError::NotFound(key.to_owned()));
        }
        let expires = Utc::now().timestamp() + i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX / 2);
        Ok(format!("memory://{key}?expires={expires}"))
    }
}
