//! Port adapters for dealroom.

#![deny(unsafe_code)]

use async_trait::async_trait;
use dealroom_core::error::DealError;
use dealroom_core::ports::{BlobStore, InMemoryNotifier, Notifier};
use dealroom_core::types::{Notification, NotificationId, UserId};
use std::path::{Path, PathBuf};
use tracing::info;

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "application/pdf" => "pdf",
        _ => "bin",
    }
}

/// Content-addressed proof storage on local disk.
///
/// Files are named `<blake3>.<ext>` and exposed as `<url_prefix>/<name>`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    url_prefix: String,
}

impl FsBlobStore {
    pub async fn open(
        root: impl Into<PathBuf>,
        url_prefix: impl Into<String>,
    ) -> Result<Self, DealError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| DealError::Blob(format!("create {}: {e}", root.display())))?;
        Ok(Self {
            root,
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read a stored blob by file name. Names outside the content-address
    /// format are refused.
    pub async fn read(&self, name: &str) -> Result<Vec<u8>, DealError> {
        let valid = name
            .split_once('.')
            .is_some_and(|(hash, ext)| {
                hash.len() == 64
                    && hash.chars().all(|c| c.is_ascii_hexdigit())
                    && ext.chars().all(|c| c.is_ascii_alphanumeric())
            });
        if !valid {
            return Err(DealError::InvalidInput(format!("invalid blob name '{name}'")));
        }
        match tokio::fs::read(self.root.join(name)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DealError::not_found("blob", name))
            }
            Err(e) => Err(DealError::Blob(format!("read {name}: {e}"))),
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    fn backend(&self) -> &'static str {
        "filesystem"
    }

    async fn put(&self, bytes: &[u8], content_type: &str) -> Result<String, DealError> {
        let name = format!(
            "{}.{}",
            blake3::hash(bytes).to_hex(),
            extension_for(content_type)
        );
        let path = self.root.join(&name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| DealError::Blob(format!("write {}: {e}", path.display())))?;
        Ok(format!("{}/{}", self.url_prefix, name))
    }
}

/// Inbox-backed notifier that also logs each alert.
#[derive(Debug, Default)]
pub struct LoggingNotifier {
    inbox: InMemoryNotifier,
}

impl LoggingNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), DealError> {
        info!(
            recipient = %notification.recipient_id,
            title = %notification.title,
            redirect = %notification.redirect,
            "Notification"
        );
        self.inbox.notify(notification).await
    }

    async fn inbox(&self, user_id: &UserId) -> Result<Vec<Notification>, DealError> {
        self.inbox.inbox(user_id).await
    }

    async fn mark_read(
        &self,
        user_id: &UserId,
        notification_id: NotificationId,
    ) -> Result<Notification, DealError> {
        self.inbox.mark_read(user_id, notification_id).await
    }
}

/// Deterministic failing notifier useful for chaos testing.
#[derive(Debug, Clone)]
pub struct AlwaysFailNotifier {
    reason: String,
}

impl AlwaysFailNotifier {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Notifier for AlwaysFailNotifier {
    async fn notify(&self, _notification: Notification) -> Result<(), DealError> {
        Err(DealError::Notification(self.reason.clone()))
    }

    async fn inbox(&self, _user_id: &UserId) -> Result<Vec<Notification>, DealError> {
        Err(DealError::Notification(self.reason.clone()))
    }

    async fn mark_read(
        &self,
        _user_id: &UserId,
        _notification_id: NotificationId,
    ) -> Result<Notification, DealError> {
        Err(DealError::Notification(self.reason.clone()))
    }
}

/// Deterministic failing blob store useful for chaos testing.
#[derive(Debug, Clone)]
pub struct AlwaysFailBlobStore {
    reason: String,
}

impl AlwaysFailBlobStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl BlobStore for AlwaysFailBlobStore {
    fn backend(&self) -> &'static str {
        "always-fail"
    }

    async fn put(&self, _bytes: &[u8], _content_type: &str) -> Result<String, DealError> {
        Err(DealError::Blob(self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealroom_core::engine::{DealEngine, DealEngineConfig, DealPorts};
    use dealroom_core::error::ErrorKind;
    use dealroom_core::settlement::PaymentProof;
    use dealroom_core::store::MemoryStore;
    use dealroom_core::types::PaymentDirection;
    use std::sync::Arc;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("dealroom-blobs-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn fs_blob_store_roundtrip() {
        let dir = scratch_dir();
        let store = FsBlobStore::open(&dir, "/v1/proofs/").await.unwrap();
        let url = store.put(b"receipt-bytes", "image/png").await.unwrap();
        assert!(url.starts_with("/v1/proofs/"));
        assert!(url.ends_with(".png"));

        let name = url.rsplit('/').next().unwrap();
        assert_eq!(store.read(name).await.unwrap(), b"receipt-bytes");
        assert!(store.read("../etc/passwd").await.is_err());

        tokio::fs::remove_dir_all(dir).await.unwrap();
    }

    #[tokio::test]
    async fn logging_notifier_keeps_inbox() {
        let notifier = LoggingNotifier::new();
        let user = UserId::new("investor-1");
        notifier
            .notify(Notification::new(user.clone(), "Hi", "body", "/deals/x"))
            .await
            .unwrap();
        assert_eq!(notifier.inbox(&user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn blob_outage_aborts_payment_record() {
        let mut ports = DealPorts::in_memory(8);
        ports.blobs = Arc::new(AlwaysFailBlobStore::new("bucket offline"));
        ports.notifier = Arc::new(AlwaysFailNotifier::new("push offline"));
        let engine = DealEngine::with_ports(
            Arc::new(MemoryStore::new()),
            ports,
            DealEngineConfig::default(),
        );

        let founder = UserId::new("founder-1");
        let investor = UserId::new("investor-1");
        let idea = engine.register_idea(founder.clone(), "Drones").await.unwrap();
        let conn = engine
            .request_connection(idea.id, investor.clone(), None)
            .await
            .unwrap();
        engine.accept_connection(conn.id, &founder).await.unwrap();

        let err = engine
            .record_payment_sent(
                conn.id,
                PaymentDirection::Investment,
                10_000,
                PaymentProof::new(vec![1, 2, 3], "image/png"),
                &investor,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DependencyFailure);
        assert!(engine
            .transactions(conn.id, &investor)
            .await
            .unwrap()
            .is_empty());
    }
}
