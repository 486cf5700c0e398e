use crate::error::DealError;
use crate::ports::{RealtimeBus, RealtimeEvent};
use crate::store::DealStore;
use crate::types::{ConnectionId, Message, MessageId, NewMessage, UserId};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

/// Ordered per-connection message log with a realtime fan-out sink.
///
/// The store assigns sequence numbers; the bus only mirrors committed
/// messages and is never consulted for state.
#[derive(Clone)]
pub struct MessagingChannel {
    store: Arc<dyn DealStore>,
    bus: Arc<dyn RealtimeBus>,
}

impl MessagingChannel {
    pub fn new(store: Arc<dyn DealStore>, bus: Arc<dyn RealtimeBus>) -> Self {
        Self { store, bus }
    }

    pub async fn append(&self, message: NewMessage) -> Result<Message, DealError> {
        if message.content.is_blank() {
            return Err(DealError::InvalidInput(
                "message content must not be empty".to_string(),
            ));
        }
        let message = self.store.append_message(message).await?;
        self.publish_messages(std::slice::from_ref(&message));
        Ok(message)
    }

    pub fn publish(&self, event: RealtimeEvent) {
        let topic = event.topic();
        let name = event.name();
        if let Err(err) = self.bus.publish(event) {
            warn!(connection = %topic, event = name, error = %err, "Realtime publish failed");
        }
    }

    pub fn publish_messages(&self, messages: &[Message]) {
        for message in messages {
            self.publish(RealtimeEvent::Message {
                message: message.clone(),
            });
        }
    }

    pub fn subscribe(&self, connection_id: ConnectionId) -> broadcast::Receiver<RealtimeEvent> {
        self.bus.subscribe(connection_id)
    }

    pub async fn history(
        &self,
        connection_id: ConnectionId,
        after_seq: Option<u64>,
    ) -> Result<Vec<Message>, DealError> {
        self.store.messages(connection_id, after_seq).await
    }

    /// Mark a counterpart's message read. Readers cannot acknowledge their own
    /// messages.
    pub async fn mark_read(
        &self,
        connection_id: ConnectionId,
        message_id: MessageId,
        reader: &UserId,
    ) -> Result<Message, DealError> {
        let message = self
            .history(connection_id, None)
            .await?
            .into_iter()
            .find(|message| message.id == message_id)
            .ok_or_else(|| DealError::not_found("message", message_id))?;
        if message.sender_id == *reader {
            return Err(DealError::InvalidInput(format!(
                "'{reader}' cannot mark their own message read"
            )));
        }
        if message.read {
            return Ok(message);
        }
        self.store
            .mark_read(connection_id, message_id, Utc::now())
            .await
    }

    pub async fn unread_count(
        &self,
        connection_id: ConnectionId,
        reader: &UserId,
    ) -> Result<usize, DealError> {
        Ok(self
            .history(connection_id, None)
            .await?
            .iter()
            .filter(|message| !message.read && message.sender_id != *reader)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::BroadcastBus;
    use crate::store::MemoryStore;
    use crate::types::{Connection, ConnectionStatus, Idea};

    async fn channel() -> (MessagingChannel, Connection) {
        let store = Arc::new(MemoryStore::new());
        let idea = Idea::new(UserId::new("founder-1"), "cold chain");
        store.insert_idea(&idea).await.unwrap();
        let mut conn = Connection::pending(&idea, UserId::new("investor-1"), None);
        conn.status = ConnectionStatus::Accepted;
        store.insert_connection(&conn).await.unwrap();
        (
            MessagingChannel::new(store, Arc::new(BroadcastBus::default())),
            conn,
        )
    }

    #[tokio::test]
    async fn blank_messages_are_rejected() {
        let (channel, conn) = channel().await;
        let err = channel
            .append(NewMessage::text(conn.id, conn.investor_id.clone(), "   "))
            .await
            .unwrap_err();
        assert!(matches!(err, DealError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn subscribers_see_appended_messages() {
        let (channel, conn) = channel().await;
        let mut rx = channel.subscribe(conn.id);
        channel
            .append(NewMessage::text(conn.id, conn.investor_id.clone(), "hello"))
            .await
            .unwrap();
        match rx.recv().await.unwrap() {
            RealtimeEvent::Message { message } => assert_eq!(message.seq, 1),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn read_receipts_update_unread_count() {
        let (channel, conn) = channel().await;
        let sent = channel
            .append(NewMessage::text(conn.id, conn.investor_id.clone(), "hello"))
            .await
            .unwrap();
        assert_eq!(channel.unread_count(conn.id, &conn.founder_id).await.unwrap(), 1);
        assert_eq!(channel.unread_count(conn.id, &conn.investor_id).await.unwrap(), 0);

        assert!(channel
            .mark_read(conn.id, sent.id, &conn.investor_id)
            .await
            .is_err());
        let read = channel
            .mark_read(conn.id, sent.id, &conn.founder_id)
            .await
            .unwrap();
        assert!(read.read);
        assert!(read.read_at.is_some());
        assert_eq!(channel.unread_count(conn.id, &conn.founder_id).await.unwrap(), 0);
    }
}
