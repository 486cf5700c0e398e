use crate::error::DealError;
use crate::ledger::{IdeaLedger, LedgerDraft, LedgerEntry, LedgerEntryKind, LedgerSummary};
use crate::messaging::MessagingChannel;
use crate::negotiation::{NegotiationAction, NegotiationMachine};
use crate::notify::NotificationFanout;
use crate::ports::{
    BlobStore, BroadcastBus, InMemoryBlobStore, InMemoryNotifier, InMemoryPayoutRegistry,
    Notifier, PayoutRegistry, RealtimeBus, RealtimeEvent,
};
use crate::role::{Party, Role};
use crate::settlement::{PaymentProof, ProofPolicy, SettlementWorkflow};
use crate::store::{ConnectionChange, DealStore, LedgerQuery, SettlementCommit, StoreConfig};
use crate::types::{
    Connection, ConnectionId, ConnectionStatus, DealStatus, Idea, IdeaId, Message,
    MessageContent, MessageId, NewMessage, Notification, NotificationId, PaymentDirection,
    PaymentInstructions, PaymentTransaction, TransactionId, TransactionStatus, UserId,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct DealEngineConfig {
    pub store: StoreConfig,
    pub currency: String,
    pub payment_uri_scheme: String,
    pub proof_policy: ProofPolicy,
    pub realtime_capacity: usize,
}

impl Default for DealEngineConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::Memory,
            currency: "INR".to_string(),
            payment_uri_scheme: "upi".to_string(),
            proof_policy: ProofPolicy::default(),
            realtime_capacity: 256,
        }
    }
}

/// Outbound collaborators other than the relational store.
#[derive(Clone)]
pub struct DealPorts {
    pub blobs: Arc<dyn BlobStore>,
    pub notifier: Arc<dyn Notifier>,
    pub payouts: Arc<dyn PayoutRegistry>,
    pub bus: Arc<dyn RealtimeBus>,
}

impl DealPorts {
    pub fn in_memory(realtime_capacity: usize) -> Self {
        Self {
            blobs: Arc::new(InMemoryBlobStore::new()),
            notifier: Arc::new(InMemoryNotifier::new()),
            payouts: Arc::new(InMemoryPayoutRegistry::new()),
            bus: Arc::new(BroadcastBus::new(realtime_capacity)),
        }
    }
}

/// Committed outcome of a connection or negotiation transition.
#[derive(Debug, Clone, Serialize)]
pub struct DealUpdate {
    pub connection: Connection,
    pub message: Option<Message>,
    pub entry: Option<LedgerEntry>,
    pub idea: Option<Idea>,
}

/// Per-connection report. Totals come from confirmed ledger rows only;
/// in-flight transactions are listed separately.
#[derive(Debug, Clone, Serialize)]
pub struct DealSummary {
    pub connection_id: ConnectionId,
    pub idea_id: IdeaId,
    pub founder_id: UserId,
    pub investor_id: UserId,
    pub status: ConnectionStatus,
    pub deal_status: DealStatus,
    pub proposed_amount_minor: Option<i64>,
    pub currency: String,
    pub totals: LedgerSummary,
    pub entries: Vec<LedgerEntry>,
    pub pending_transactions: Vec<PaymentTransaction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateCheck {
    pub idea_id: IdeaId,
    pub recorded_minor: i64,
    pub ledger_minor: i64,
    pub consistent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainCheck {
    pub idea_id: IdeaId,
    pub entries: usize,
    pub head_hash: Option<String>,
    pub valid: bool,
}

/// Deal negotiation and settlement engine.
///
/// Every state change is committed through the store as one conditional
/// unit; realtime events and notifications follow the commit and never roll
/// it back.
pub struct DealEngine {
    store: Arc<dyn DealStore>,
    machine: NegotiationMachine,
    channel: MessagingChannel,
    fanout: NotificationFanout,
    settlement: SettlementWorkflow,
    payouts: Arc<dyn PayoutRegistry>,
    config: DealEngineConfig,
}

impl DealEngine {
    /// Bootstrap with the configured store and in-memory ports.
    pub async fn bootstrap(config: DealEngineConfig) -> Result<Self, DealError> {
        let store = config.store.bootstrap().await?;
        let ports = DealPorts::in_memory(config.realtime_capacity);
        Ok(Self::with_ports(store, ports, config))
    }

    pub fn with_ports(store: Arc<dyn DealStore>, ports: DealPorts, config: DealEngineConfig) -> Self {
        let channel = MessagingChannel::new(store.clone(), ports.bus);
        let fanout = NotificationFanout::new(ports.notifier);
        let settlement = SettlementWorkflow::new(
            store.clone(),
            ports.blobs,
            ports.payouts.clone(),
            channel.clone(),
            fanout.clone(),
            config.currency.clone(),
            config.payment_uri_scheme.clone(),
            config.proof_policy.clone(),
        );

        info!(
            store = store.backend_label(),
            currency = %config.currency,
            "Deal engine ready"
        );

        Self {
            store,
            machine: NegotiationMachine::new(config.currency.clone()),
            channel,
            fanout,
            settlement,
            payouts: ports.payouts,
            config,
        }
    }

    pub fn config(&self) -> &DealEngineConfig {
        &self.config
    }

    pub fn store_backend(&self) -> &'static str {
        self.store.backend_label()
    }

    async fn party_connection(
        &self,
        connection_id: ConnectionId,
        actor: &UserId,
    ) -> Result<(Connection, Party), DealError> {
        let connection = self.store.get_connection(connection_id).await?;
        let party = Party::resolve(&connection, actor)?;
        Ok((connection, party))
    }

    fn publish_update(&self, update: &DealUpdate) {
        self.channel.publish(RealtimeEvent::Connection {
            connection: update.connection.clone(),
        });
        if let Some(message) = &update.message {
            self.channel.publish_messages(std::slice::from_ref(message));
        }
    }

    async fn commit(&self, change: ConnectionChange) -> Result<DealUpdate, DealError> {
        let commit = self.store.commit_connection(change).await?;
        let update = DealUpdate {
            connection: commit.connection,
            message: commit.message,
            entry: commit.entry,
            idea: commit.idea,
        };
        self.publish_update(&update);
        Ok(update)
    }

    // Ideas

    pub async fn register_idea(
        &self,
        founder_id: UserId,
        title: impl Into<String>,
    ) -> Result<Idea, DealError> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(DealError::InvalidInput(
                "idea title must not be empty".to_string(),
            ));
        }
        let idea = Idea::new(founder_id, title.trim());
        self.store.insert_idea(&idea).await?;
        info!(idea = %idea.id, founder = %idea.founder_id, "Idea registered");
        Ok(idea)
    }

    pub async fn idea(&self, idea_id: IdeaId) -> Result<Idea, DealError> {
        self.store.get_idea(idea_id).await
    }

    // Connections

    pub async fn request_connection(
        &self,
        idea_id: IdeaId,
        investor_id: UserId,
        note: Option<String>,
    ) -> Result<Connection, DealError> {
        let idea = self.store.get_idea(idea_id).await?;
        if idea.founder_id == investor_id {
            return Err(DealError::NotAuthorized(format!(
                "'{investor_id}' founded idea '{idea_id}' and cannot invest in it"
            )));
        }
        let note = note
            .map(|note| note.trim().to_string())
            .filter(|note| !note.is_empty());
        let connection = Connection::pending(&idea, investor_id, note);
        self.store.insert_connection(&connection).await?;

        info!(
            connection = %connection.id,
            idea = %idea_id,
            investor = %connection.investor_id,
            "Connection requested"
        );
        self.fanout
            .notify(
                &connection.founder_id,
                "New connection request",
                format!("{} wants to connect about '{}'", connection.investor_id, idea.title),
                format!("/connections/{}", connection.id),
            )
            .await;
        Ok(connection)
    }

    pub async fn accept_connection(
        &self,
        connection_id: ConnectionId,
        actor: &UserId,
    ) -> Result<DealUpdate, DealError> {
        self.decide_connection(connection_id, actor, ConnectionStatus::Accepted)
            .await
    }

    pub async fn reject_connection(
        &self,
        connection_id: ConnectionId,
        actor: &UserId,
    ) -> Result<DealUpdate, DealError> {
        self.decide_connection(connection_id, actor, ConnectionStatus::Rejected)
            .await
    }

    async fn decide_connection(
        &self,
        connection_id: ConnectionId,
        actor: &UserId,
        decision: ConnectionStatus,
    ) -> Result<DealUpdate, DealError> {
        let operation = match decision {
            ConnectionStatus::Accepted => "accept_connection",
            _ => "reject_connection",
        };
        let (connection, party) = self.party_connection(connection_id, actor).await?;
        party.require(Role::Founder, operation)?;
        if connection.status != ConnectionStatus::Pending {
            return Err(DealError::transition_violation(
                operation,
                ConnectionStatus::Pending.as_str(),
                connection.status.as_str(),
            ));
        }

        let mut next = connection.clone();
        next.status = decision;
        next.updated_at = Utc::now();
        let (audit, title) = match decision {
            ConnectionStatus::Accepted => ("Connection request accepted", "Connection accepted"),
            _ => ("Connection request declined", "Connection declined"),
        };

        let update = self
            .commit(ConnectionChange {
                expected: connection.guard(),
                next,
                message: Some(NewMessage::text(connection.id, party.user_id.clone(), audit)),
                ledger: None,
            })
            .await?;

        info!(
            connection = %connection_id,
            status = update.connection.status.as_str(),
            "Connection decided"
        );
        self.fanout
            .notify(
                &connection.investor_id,
                title,
                audit,
                format!("/connections/{connection_id}"),
            )
            .await;
        Ok(update)
    }

    pub async fn connection(
        &self,
        connection_id: ConnectionId,
        actor: &UserId,
    ) -> Result<Connection, DealError> {
        Ok(self.party_connection(connection_id, actor).await?.0)
    }

    pub async fn connections_for(&self, user_id: &UserId) -> Result<Vec<Connection>, DealError> {
        self.store.connections_for_user(user_id).await
    }

    // Messaging

    /// Post a chat message. The first message on an accepted connection moves
    /// it to `communicating` in the same unit.
    pub async fn send_message(
        &self,
        connection_id: ConnectionId,
        sender: &UserId,
        content: MessageContent,
    ) -> Result<Message, DealError> {
        if content.is_blank() {
            return Err(DealError::InvalidInput(
                "message content must not be empty".to_string(),
            ));
        }

        let (mut connection, party) = self.party_connection(connection_id, sender).await?;
        if !connection.status.is_active() {
            return Err(DealError::InvalidState(format!(
                "connection '{}' is '{}', chat opens once the founder accepts",
                connection.id,
                connection.status.as_str()
            )));
        }

        let message = NewMessage::new(connection.id, party.user_id.clone(), content);
        let posted = loop {
            if connection.status != ConnectionStatus::Accepted {
                break self.channel.append(message).await?;
            }

            let mut next = connection.clone();
            next.status = ConnectionStatus::Communicating;
            next.updated_at = Utc::now();
            match self
                .commit(ConnectionChange {
                    expected: connection.guard(),
                    next,
                    message: Some(message.clone()),
                    ledger: None,
                })
                .await
            {
                Ok(update) => {
                    break update.message.ok_or_else(|| {
                        DealError::Store("committed message missing from store result".to_string())
                    })?
                }
                // Someone else moved the connection first; post against the fresh state.
                Err(DealError::StaleState(_)) => {
                    connection = self.store.get_connection(connection_id).await?;
                }
                Err(err) => return Err(err),
            }
        };

        self.fanout
            .notify(
                party.counterpart_id(&connection),
                "New message",
                format!("{} sent you a message", party.user_id),
                format!("/deals/{connection_id}"),
            )
            .await;
        Ok(posted)
    }

    pub async fn messages(
        &self,
        connection_id: ConnectionId,
        actor: &UserId,
        after_seq: Option<u64>,
    ) -> Result<Vec<Message>, DealError> {
        self.party_connection(connection_id, actor).await?;
        self.channel.history(connection_id, after_seq).await
    }

    pub async fn mark_message_read(
        &self,
        connection_id: ConnectionId,
        message_id: MessageId,
        actor: &UserId,
    ) -> Result<Message, DealError> {
        self.party_connection(connection_id, actor).await?;
        self.channel.mark_read(connection_id, message_id, actor).await
    }

    pub async fn unread_count(
        &self,
        connection_id: ConnectionId,
        actor: &UserId,
    ) -> Result<usize, DealError> {
        self.party_connection(connection_id, actor).await?;
        self.channel.unread_count(connection_id, actor).await
    }

    pub async fn subscribe(
        &self,
        connection_id: ConnectionId,
        actor: &UserId,
    ) -> Result<broadcast::Receiver<RealtimeEvent>, DealError> {
        self.party_connection(connection_id, actor).await?;
        Ok(self.channel.subscribe(connection_id))
    }

    // Negotiation

    pub async fn negotiate(
        &self,
        connection_id: ConnectionId,
        actor: &UserId,
        action: NegotiationAction,
    ) -> Result<DealUpdate, DealError> {
        let (connection, party) = self.party_connection(connection_id, actor).await?;
        let transition = match self.machine.apply(&connection, &party, action) {
            Ok(transition) => transition,
            Err(err) => {
                warn!(
                    connection = %connection_id,
                    action = action.name(),
                    actor = %actor,
                    error = %err,
                    "Negotiation action rejected"
                );
                return Err(err);
            }
        };

        let ledger = transition.mint.map(|amount| {
            LedgerDraft::investment(&connection, amount, None, transition.audit.clone())
        });
        let update = self
            .commit(ConnectionChange {
                expected: transition.expected,
                next: transition.next,
                message: Some(NewMessage::text(
                    connection.id,
                    party.user_id.clone(),
                    transition.audit,
                )),
                ledger,
            })
            .await?;

        info!(
            connection = %connection_id,
            action = action.name(),
            status = update.connection.status.as_str(),
            deal_status = update.connection.deal_status.as_str(),
            minted = update.entry.as_ref().map(|entry| entry.amount.minor()),
            "Negotiation transition committed"
        );
        self.fanout
            .notify(
                party.counterpart_id(&connection),
                transition.notice.title,
                transition.notice.body,
                format!("/deals/{connection_id}"),
            )
            .await;
        Ok(update)
    }

    pub async fn propose(
        &self,
        connection_id: ConnectionId,
        actor: &UserId,
        amount_minor: i64,
    ) -> Result<DealUpdate, DealError> {
        self.negotiate(connection_id, actor, NegotiationAction::Propose { amount_minor })
            .await
    }

    pub async fn accept_proposal(
        &self,
        connection_id: ConnectionId,
        actor: &UserId,
    ) -> Result<DealUpdate, DealError> {
        self.negotiate(connection_id, actor, NegotiationAction::AcceptProposal)
            .await
    }

    pub async fn reject_proposal(
        &self,
        connection_id: ConnectionId,
        actor: &UserId,
    ) -> Result<DealUpdate, DealError> {
        self.negotiate(connection_id, actor, NegotiationAction::RejectProposal)
            .await
    }

    pub async fn request_reinvestment(
        &self,
        connection_id: ConnectionId,
        actor: &UserId,
        amount_minor: i64,
    ) -> Result<DealUpdate, DealError> {
        self.negotiate(
            connection_id,
            actor,
            NegotiationAction::RequestReinvestment { amount_minor },
        )
        .await
    }

    pub async fn accept_request(
        &self,
        connection_id: ConnectionId,
        actor: &UserId,
    ) -> Result<DealUpdate, DealError> {
        self.negotiate(connection_id, actor, NegotiationAction::AcceptRequest)
            .await
    }

    pub async fn reject_request(
        &self,
        connection_id: ConnectionId,
        actor: &UserId,
    ) -> Result<DealUpdate, DealError> {
        self.negotiate(connection_id, actor, NegotiationAction::RejectRequest)
            .await
    }

    // Payments

    pub async fn register_payout_handle(
        &self,
        user_id: &UserId,
        handle: &str,
    ) -> Result<(), DealError> {
        self.payouts.register(user_id, handle).await?;
        info!(user = %user_id, "Payout handle registered");
        Ok(())
    }

    pub async fn payout_handle(&self, user_id: &UserId) -> Result<Option<String>, DealError> {
        self.payouts.lookup(user_id).await
    }

    pub async fn initiate_payment(
        &self,
        connection_id: ConnectionId,
        direction: PaymentDirection,
        amount_minor: i64,
        actor: &UserId,
    ) -> Result<PaymentInstructions, DealError> {
        let connection = self.store.get_connection(connection_id).await?;
        self.settlement
            .initiate(direction, &connection, amount_minor, actor)
            .await
    }

    pub async fn record_payment_sent(
        &self,
        connection_id: ConnectionId,
        direction: PaymentDirection,
        amount_minor: i64,
        proof: PaymentProof,
        actor: &UserId,
    ) -> Result<PaymentTransaction, DealError> {
        let connection = self.store.get_connection(connection_id).await?;
        self.settlement
            .record_initiator_confirmation(direction, &connection, amount_minor, proof, actor)
            .await
    }

    pub async fn confirm_receipt(
        &self,
        transaction_id: TransactionId,
        actor: &UserId,
    ) -> Result<SettlementCommit, DealError> {
        match self.settlement.confirm_receipt(transaction_id, actor).await {
            Err(err @ DealError::AlreadyCompleted(_)) => {
                warn!(transaction = %transaction_id, actor = %actor, "Duplicate receipt confirmation ignored");
                Err(err)
            }
            other => other,
        }
    }

    pub async fn transaction(
        &self,
        transaction_id: TransactionId,
        actor: &UserId,
    ) -> Result<PaymentTransaction, DealError> {
        let transaction = self.store.get_transaction(transaction_id).await?;
        self.party_connection(transaction.connection_id, actor).await?;
        Ok(transaction)
    }

    pub async fn transactions(
        &self,
        connection_id: ConnectionId,
        actor: &UserId,
    ) -> Result<Vec<PaymentTransaction>, DealError> {
        self.party_connection(connection_id, actor).await?;
        self.store.transactions_for_connection(connection_id).await
    }

    // Reporting

    pub async fn deal_summary(
        &self,
        connection_id: ConnectionId,
        actor: &UserId,
    ) -> Result<DealSummary, DealError> {
        let (connection, _) = self.party_connection(connection_id, actor).await?;
        let entries = self
            .store
            .ledger_entries(&LedgerQuery::connection(connection_id))
            .await?;
        let pending_transactions = self
            .store
            .transactions_for_connection(connection_id)
            .await?
            .into_iter()
            .filter(|tx| tx.status == TransactionStatus::InitiatorConfirmed)
            .collect();

        Ok(DealSummary {
            connection_id,
            idea_id: connection.idea_id,
            founder_id: connection.founder_id,
            investor_id: connection.investor_id,
            status: connection.status,
            deal_status: connection.deal_status,
            proposed_amount_minor: connection.proposed_amount.map(|amount| amount.minor()),
            currency: self.config.currency.clone(),
            totals: LedgerSummary::from_entries(&entries),
            entries,
            pending_transactions,
        })
    }

    /// Ledger of one idea in chain order.
    pub async fn idea_ledger(&self, idea_id: IdeaId) -> Result<Vec<LedgerEntry>, DealError> {
        self.store.get_idea(idea_id).await?;
        let mut entries = self.store.ledger_entries(&LedgerQuery::idea(idea_id)).await?;
        entries.sort_by_key(|entry| entry.index);
        Ok(entries)
    }

    /// Compare the denormalized `investment_received` with the ledger sum.
    pub async fn verify_idea_aggregate(&self, idea_id: IdeaId) -> Result<AggregateCheck, DealError> {
        let idea = self.store.get_idea(idea_id).await?;
        let ledger_minor = self
            .store
            .ledger_entries(&LedgerQuery {
                idea_id: Some(idea_id),
                kind: Some(LedgerEntryKind::InvestmentRecord),
                ..LedgerQuery::default()
            })
            .await?
            .iter()
            .map(|entry| entry.amount.minor())
            .sum::<i64>();

        let check = AggregateCheck {
            idea_id,
            recorded_minor: idea.investment_received_minor,
            ledger_minor,
            consistent: idea.investment_received_minor == ledger_minor,
        };
        if !check.consistent {
            warn!(
                idea = %idea_id,
                recorded = check.recorded_minor,
                ledger = check.ledger_minor,
                "Investment aggregate diverges from ledger"
            );
        }
        Ok(check)
    }

    pub async fn verify_ledger_chain(&self, idea_id: IdeaId) -> Result<ChainCheck, DealError> {
        let entries = self.idea_ledger(idea_id).await?;
        let count = entries.len();
        let head_hash = entries.last().map(|entry| entry.entry_hash.clone());
        let valid = match IdeaLedger::from_entries(entries) {
            Ok(_) => true,
            Err(err) => {
                warn!(idea = %idea_id, error = %err, "Ledger chain verification failed");
                false
            }
        };
        Ok(ChainCheck {
            idea_id,
            entries: count,
            head_hash,
            valid,
        })
    }

    // Notifications

    pub async fn notifications(&self, user_id: &UserId) -> Result<Vec<Notification>, DealError> {
        self.fanout.notifier().inbox(user_id).await
    }

    pub async fn mark_notification_read(
        &self,
        user_id: &UserId,
        notification_id: NotificationId,
    ) -> Result<Notification, DealError> {
        self.fanout
            .notifier()
            .mark_read(user_id, notification_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    async fn engine() -> DealEngine {
        DealEngine::bootstrap(DealEngineConfig::default())
            .await
            .unwrap()
    }

    async fn accepted(engine: &DealEngine) -> (Idea, Connection) {
        let idea = engine
            .register_idea(UserId::new("founder-1"), "Solar kiosks")
            .await
            .unwrap();
        let conn = engine
            .request_connection(idea.id, UserId::new("investor-1"), Some("hi".into()))
            .await
            .unwrap();
        engine
            .accept_connection(conn.id, &UserId::new("founder-1"))
            .await
            .unwrap();
        (idea, conn)
    }

    #[tokio::test]
    async fn founder_cannot_connect_to_own_idea() {
        let engine = engine().await;
        let idea = engine
            .register_idea(UserId::new("founder-1"), "Solar kiosks")
            .await
            .unwrap();
        let err = engine
            .request_connection(idea.id, UserId::new("founder-1"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }

    #[tokio::test]
    async fn only_founder_decides_connection() {
        let engine = engine().await;
        let idea = engine
            .register_idea(UserId::new("founder-1"), "Solar kiosks")
            .await
            .unwrap();
        let conn = engine
            .request_connection(idea.id, UserId::new("investor-1"), None)
            .await
            .unwrap();

        let err = engine
            .accept_connection(conn.id, &UserId::new("investor-1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        let err = engine
            .propose(conn.id, &UserId::new("investor-1"), 100)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);

        let rejected = engine
            .reject_connection(conn.id, &UserId::new("founder-1"))
            .await
            .unwrap();
        assert_eq!(rejected.connection.status, ConnectionStatus::Rejected);

        // A rejected pair may ask again.
        engine
            .request_connection(idea.id, UserId::new("investor-1"), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn first_message_moves_to_communicating() {
        let engine = engine().await;
        let (_, conn) = accepted(&engine).await;
        let investor = UserId::new("investor-1");

        engine
            .send_message(conn.id, &investor, MessageContent::text("Hello"))
            .await
            .unwrap();
        assert_eq!(
            engine.connection(conn.id, &investor).await.unwrap().status,
            ConnectionStatus::Communicating
        );

        let second = engine
            .send_message(conn.id, &UserId::new("founder-1"), MessageContent::text("Hi"))
            .await
            .unwrap();
        let history = engine.messages(conn.id, &investor, None).await.unwrap();
        assert_eq!(history.last().unwrap().id, second.id);
        assert!(history.windows(2).all(|pair| pair[0].seq < pair[1].seq));
    }

    #[tokio::test]
    async fn outsiders_cannot_read_deals() {
        let engine = engine().await;
        let (_, conn) = accepted(&engine).await;
        let err = engine
            .deal_summary(conn.id, &UserId::new("mallory"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }

    #[tokio::test]
    async fn instant_accept_mints_and_reports() {
        let engine = engine().await;
        let (idea, conn) = accepted(&engine).await;
        let investor = UserId::new("investor-1");
        let founder = UserId::new("founder-1");

        engine.propose(conn.id, &investor, 5_000_000).await.unwrap();
        let update = engine.accept_proposal(conn.id, &founder).await.unwrap();
        assert_eq!(update.connection.status, ConnectionStatus::DealDone);
        assert_eq!(update.idea.unwrap().investment_received_minor, 5_000_000);

        let summary = engine.deal_summary(conn.id, &founder).await.unwrap();
        assert_eq!(summary.totals.total_invested_minor, 5_000_000);
        assert_eq!(summary.totals.instant_invested_minor, 5_000_000);
        assert_eq!(summary.totals.verified_invested_minor, 0);
        assert!(summary.pending_transactions.is_empty());

        assert!(engine.verify_idea_aggregate(idea.id).await.unwrap().consistent);
        let chain = engine.verify_ledger_chain(idea.id).await.unwrap();
        assert!(chain.valid);
        assert_eq!(chain.entries, 1);
    }

    #[tokio::test]
    async fn counterpart_gets_notified() {
        let engine = engine().await;
        let (_, conn) = accepted(&engine).await;
        let founder = UserId::new("founder-1");
        engine
            .propose(conn.id, &UserId::new("investor-1"), 10_000)
            .await
            .unwrap();

        let inbox = engine.notifications(&founder).await.unwrap();
        let offer = inbox
            .iter()
            .find(|n| n.title == "New investment proposal")
            .unwrap();
        let read = engine
            .mark_notification_read(&founder, offer.id)
            .await
            .unwrap();
        assert!(read.read);
    }
}
