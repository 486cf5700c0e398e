use crate::ports::Notifier;
use crate::types::{Notification, UserId};
use std::sync::Arc;
use tracing::{debug, warn};

/// Best-effort notification fan-out. Failures are logged and swallowed so a
/// committed ledger operation never depends on delivery.
#[derive(Clone)]
pub struct NotificationFanout {
    notifier: Arc<dyn Notifier>,
}

impl NotificationFanout {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Returns whether the notifier accepted the alert.
    pub async fn notify(
        &self,
        recipient: &UserId,
        title: impl Into<String>,
        body: impl Into<String>,
        redirect: impl Into<String>,
    ) -> bool {
        let notification = Notification::new(recipient.clone(), title, body, redirect);
        let id = notification.id;
        match self.notifier.notify(notification).await {
            Ok(()) => {
                debug!(recipient = %recipient, notification = %id, "Notification delivered");
                true
            }
            Err(err) => {
                warn!(recipient = %recipient, error = %err, "Notification failed; continuing");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DealError;
    use crate::ports::InMemoryNotifier;
    use crate::types::NotificationId;
    use async_trait::async_trait;

    struct Down;

    #[async_trait]
    impl Notifier for Down {
        async fn notify(&self, _notification: Notification) -> Result<(), DealError> {
            Err(DealError::Notification("gateway down".to_string()))
        }

        async fn inbox(&self, _user_id: &UserId) -> Result<Vec<Notification>, DealError> {
            Ok(Vec::new())
        }

        async fn mark_read(
            &self,
            _user_id: &UserId,
            notification_id: NotificationId,
        ) -> Result<Notification, DealError> {
            Err(DealError::not_found("notification", notification_id))
        }
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let fanout = NotificationFanout::new(Arc::new(Down));
        assert!(!fanout.notify(&UserId::new("u"), "t", "b", "/").await);
    }

    #[tokio::test]
    async fn delivered_notifications_land_in_inbox() {
        let notifier = Arc::new(InMemoryNotifier::new());
        let fanout = NotificationFanout::new(notifier.clone());
        let user = UserId::new("founder-1");
        assert!(fanout.notify(&user, "Payment", "INR 1.00", "/deals/x").await);
        assert_eq!(notifier.inbox(&user).await.unwrap().len(), 1);
    }
}
