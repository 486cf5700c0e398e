use crate::error::DealError;
use crate::types::{
    Connection, ConnectionId, Message, Notification, NotificationId, PaymentTransaction, UserId,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

/// Blob storage for payment proofs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Persist `bytes` and return a URL the counterpart can open.
    async fn put(&self, bytes: &[u8], content_type: &str) -> Result<String, DealError>;
}

/// Content-addressed blob store kept in memory; URLs are `mem://proofs/<blake3>`.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: Mutex<HashMap<String, (String, Vec<u8>)>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<(String, Vec<u8>)> {
        self.blobs.lock().ok()?.get(url).cloned()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|blobs| blobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, bytes: &[u8], content_type: &str) -> Result<String, DealError> {
        let url = format!("mem://proofs/{}", blake3::hash(bytes).to_hex());
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| DealError::Blob("blob table lock poisoned".to_string()))?;
        blobs.insert(url.clone(), (content_type.to_string(), bytes.to_vec()));
        Ok(url)
    }
}

/// Advisory per-user alerts.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), DealError>;

    async fn inbox(&self, user_id: &UserId) -> Result<Vec<Notification>, DealError>;

    async fn mark_read(
        &self,
        user_id: &UserId,
        notification_id: NotificationId,
    ) -> Result<Notification, DealError>;
}

#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    inboxes: Mutex<HashMap<UserId, Vec<Notification>>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<UserId, Vec<Notification>>>, DealError> {
        self.inboxes
            .lock()
            .map_err(|_| DealError::Notification("inbox lock poisoned".to_string()))
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), DealError> {
        self.lock()?
            .entry(notification.recipient_id.clone())
            .or_default()
            .push(notification);
        Ok(())
    }

    async fn inbox(&self, user_id: &UserId) -> Result<Vec<Notification>, DealError> {
        Ok(self.lock()?.get(user_id).cloned().unwrap_or_default())
    }

    async fn mark_read(
        &self,
        user_id: &UserId,
        notification_id: NotificationId,
    ) -> Result<Notification, DealError> {
        let mut inboxes = self.lock()?;
        let notification = inboxes
            .get_mut(user_id)
            .and_then(|inbox| inbox.iter_mut().find(|n| n.id == notification_id))
            .ok_or_else(|| DealError::not_found("notification", notification_id))?;
        notification.read = true;
        Ok(notification.clone())
    }
}

/// Optional per-user payout handle (UPI VPA or similar).
#[async_trait]
pub trait PayoutRegistry: Send + Sync {
    async fn register(&self, user_id: &UserId, handle: &str) -> Result<(), DealError>;

    async fn lookup(&self, user_id: &UserId) -> Result<Option<String>, DealError>;
}

#[derive(Debug, Default)]
pub struct InMemoryPayoutRegistry {
    handles: Mutex<HashMap<UserId, String>>,
}

impl InMemoryPayoutRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PayoutRegistry for InMemoryPayoutRegistry {
    async fn register(&self, user_id: &UserId, handle: &str) -> Result<(), DealError> {
        let handle = handle.trim();
        if handle.is_empty() {
            return Err(DealError::InvalidInput(
                "payout handle must not be empty".to_string(),
            ));
        }
        self.handles
            .lock()
            .map_err(|_| DealError::Store("payout registry lock poisoned".to_string()))?
            .insert(user_id.clone(), handle.to_string());
        Ok(())
    }

    async fn lookup(&self, user_id: &UserId) -> Result<Option<String>, DealError> {
        Ok(self
            .handles
            .lock()
            .map_err(|_| DealError::Store("payout registry lock poisoned".to_string()))?
            .get(user_id)
            .cloned())
    }
}

/// Event pushed to subscribers of one connection topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RealtimeEvent {
    Message { message: Message },
    Connection { connection: Connection },
    Transaction { transaction: PaymentTransaction },
}

impl RealtimeEvent {
    pub fn topic(&self) -> ConnectionId {
        match self {
            Self::Message { message } => message.connection_id,
            Self::Connection { connection } => connection.id,
            Self::Transaction { transaction } => transaction.connection_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::Connection { .. } => "connection",
            Self::Transaction { .. } => "transaction",
        }
    }
}

/// Realtime pub/sub sink. Never read back for state.
pub trait RealtimeBus: Send + Sync {
    fn publish(&self, event: RealtimeEvent) -> Result<(), DealError>;

    fn subscribe(&self, topic: ConnectionId) -> broadcast::Receiver<RealtimeEvent>;
}

/// Per-topic tokio broadcast channels. Late subscribers only see new events.
#[derive(Debug)]
pub struct BroadcastBus {
    capacity: usize,
    topics: Mutex<HashMap<ConnectionId, broadcast::Sender<RealtimeEvent>>>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: Mutex::new(HashMap::new()),
        }
    }

    fn topics(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<ConnectionId, broadcast::Sender<RealtimeEvent>>>, DealError>
    {
        self.topics
            .lock()
            .map_err(|_| DealError::Notification("realtime topic lock poisoned".to_string()))
    }

    /// Topics that currently hold a sender.
    pub fn topic_count(&self) -> usize {
        self.topics().map(|topics| topics.len()).unwrap_or(0)
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl RealtimeBus for BroadcastBus {
    /// Senders without live receivers are dropped on every publish; nobody
    /// can observe an event sent to them.
    fn publish(&self, event: RealtimeEvent) -> Result<(), DealError> {
        let mut topics = self.topics()?;
        topics.retain(|_, sender| sender.receiver_count() > 0);
        if let Some(sender) = topics.get(&event.topic()) {
            // Receivers may drop between retain and send; that is not a failure for a sink.
            let _ = sender.send(event);
        }
        Ok(())
    }

    fn subscribe(&self, topic: ConnectionId) -> broadcast::Receiver<RealtimeEvent> {
        match self.topics() {
            Ok(mut topics) => topics
                .entry(topic)
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe(),
            Err(_) => broadcast::channel(1).1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MessageContent, MessageId, MessageType};
    use chrono::Utc;

    #[tokio::test]
    async fn blob_urls_are_content_addressed() {
        let blobs = InMemoryBlobStore::new();
        let first = blobs.put(b"receipt", "image/png").await.unwrap();
        let second = blobs.put(b"receipt", "image/png").await.unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("mem://proofs/"));
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs.get(&first).unwrap().0, "image/png");
    }

    #[tokio::test]
    async fn notifier_inbox_and_mark_read() {
        let notifier = InMemoryNotifier::new();
        let user = UserId::new("investor-1");
        let notification = Notification::new(user.clone(), "Offer", "INR 10.00", "/deals/1");
        let id = notification.id;
        notifier.notify(notification).await.unwrap();

        let marked = notifier.mark_read(&user, id).await.unwrap();
        assert!(marked.read);
        assert!(notifier.inbox(&user).await.unwrap()[0].read);
        assert!(notifier
            .mark_read(&UserId::new("someone-else"), id)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn payout_registry_rejects_blank_handles() {
        let registry = InMemoryPayoutRegistry::new();
        let user = UserId::new("founder-1");
        assert!(registry.register(&user, "  ").await.is_err());
        registry.register(&user, "founder@upi").await.unwrap();
        assert_eq!(
            registry.lookup(&user).await.unwrap().as_deref(),
            Some("founder@upi")
        );
    }

    #[tokio::test]
    async fn bus_delivers_in_order_to_live_subscribers() {
        let bus = BroadcastBus::default();
        let topic = ConnectionId::generate();
        let mut rx = bus.subscribe(topic);

        for seq in 1..=3 {
            bus.publish(RealtimeEvent::Message {
                message: Message {
                    id: MessageId::generate(),
                    connection_id: topic,
                    seq,
                    sender_id: UserId::new("investor-1"),
                    message_type: MessageType::Text,
                    content: MessageContent::text(format!("m{seq}")),
                    read: false,
                    read_at: None,
                    created_at: Utc::now(),
                },
            })
            .unwrap();
        }

        for expected in 1..=3 {
            match rx.recv().await.unwrap() {
                RealtimeEvent::Message { message } => assert_eq!(message.seq, expected),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    fn text_event(topic: ConnectionId, body: &str) -> RealtimeEvent {
        RealtimeEvent::Message {
            message: Message {
                id: MessageId::generate(),
                connection_id: topic,
                seq: 1,
                sender_id: UserId::new("founder-1"),
                message_type: MessageType::Text,
                content: MessageContent::text(body),
                read: false,
                read_at: None,
                created_at: Utc::now(),
            },
        }
    }

    #[test]
    fn idle_topics_are_pruned_on_publish() {
        let bus = BroadcastBus::new(4);
        let live = ConnectionId::generate();
        let idle = ConnectionId::generate();

        bus.publish(text_event(ConnectionId::generate(), "nobody listening"))
            .unwrap();
        assert_eq!(bus.topic_count(), 0);

        let mut live_rx = bus.subscribe(live);
        let idle_rx = bus.subscribe(idle);
        assert_eq!(bus.topic_count(), 2);

        drop(idle_rx);
        bus.publish(text_event(live, "still here")).unwrap();
        assert_eq!(bus.topic_count(), 1);
        assert!(live_rx.try_recv().is_ok());
    }
}
