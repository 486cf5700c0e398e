use crate::error::DealError;
use crate::ledger::{IdeaLedger, LedgerDraft, LedgerEntry, LedgerEntryKind};
use crate::postgres::PostgresStore;
use crate::types::{
    Connection, ConnectionGuard, ConnectionId, ConnectionStatus, Idea, IdeaId,
    Message, MessageId, NewMessage, PaymentTransaction, TransactionId, TransactionStatus, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Store backend configuration.
#[derive(Debug, Clone, Default)]
pub enum StoreConfig {
    /// Keep every table in process memory only.
    #[default]
    Memory,
    /// Persist in PostgreSQL.
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }

    pub async fn bootstrap(&self) -> Result<Arc<dyn DealStore>, DealError> {
        match self {
            Self::Memory => Ok(Arc::new(MemoryStore::new())),
            Self::Postgres {
                database_url,
                max_connections,
            } => {
                let store = PostgresStore::connect(database_url, *max_connections).await?;
                store.ensure_schema().await?;
                Ok(Arc::new(store))
            }
        }
    }
}

/// Conditional connection update committed as one unit with its audit
/// message and optional investment entry.
#[derive(Debug, Clone)]
pub struct ConnectionChange {
    pub expected: ConnectionGuard,
    pub next: Connection,
    pub message: Option<NewMessage>,
    pub ledger: Option<LedgerDraft>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionCommit {
    pub connection: Connection,
    pub message: Option<Message>,
    pub entry: Option<LedgerEntry>,
    /// Idea snapshot after an aggregate increment.
    pub idea: Option<Idea>,
}

/// Payee confirmation of an `initiator_confirmed` transaction.
#[derive(Debug, Clone)]
pub struct TransactionCompletion {
    pub transaction_id: TransactionId,
    pub confirmed_at: DateTime<Utc>,
    pub ledger: LedgerDraft,
    pub messages: Vec<NewMessage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementCommit {
    pub transaction: PaymentTransaction,
    pub entry: LedgerEntry,
    pub messages: Vec<Message>,
    pub idea: Option<Idea>,
}

#[derive(Debug, Clone, Default)]
pub struct LedgerQuery {
    pub idea_id: Option<IdeaId>,
    pub connection_id: Option<ConnectionId>,
    pub kind: Option<LedgerEntryKind>,
}

impl LedgerQuery {
    pub fn idea(idea_id: IdeaId) -> Self {
        Self {
            idea_id: Some(idea_id),
            ..Self::default()
        }
    }

    pub fn connection(connection_id: ConnectionId) -> Self {
        Self {
            connection_id: Some(connection_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.idea_id.map_or(true, |id| entry.idea_id == id)
            && self.connection_id.map_or(true, |id| entry.connection_id == id)
            && self.kind.map_or(true, |kind| entry.kind == kind)
    }
}

/// Relational store port.
///
/// Every method is atomic on its own. `commit_connection` and
/// `complete_transaction` apply their status change, ledger insert, aggregate
/// increment and audit messages all-or-nothing, and fail with a state conflict
/// when the stored row no longer matches the expected prior state.
#[async_trait]
pub trait DealStore: Send + Sync {
    fn backend_label(&self) -> &'static str;

    async fn insert_idea(&self, idea: &Idea) -> Result<(), DealError>;

    async fn get_idea(&self, id: IdeaId) -> Result<Idea, DealError>;

    /// Fails with a state conflict while a pending or active connection for
    /// the same idea/investor pair exists.
    async fn insert_connection(&self, connection: &Connection) -> Result<(), DealError>;

    async fn get_connection(&self, id: ConnectionId) -> Result<Connection, DealError>;

    async fn connections_for_user(&self, user_id: &UserId) -> Result<Vec<Connection>, DealError>;

    async fn commit_connection(
        &self,
        change: ConnectionChange,
    ) -> Result<ConnectionCommit, DealError>;

    async fn append_message(&self, message: NewMessage) -> Result<Message, DealError>;

    /// Messages ordered by sequence, optionally only those after `after_seq`.
    async fn messages(
        &self,
        connection_id: ConnectionId,
        after_seq: Option<u64>,
    ) -> Result<Vec<Message>, DealError>;

    async fn mark_read(
        &self,
        connection_id: ConnectionId,
        message_id: MessageId,
        read_at: DateTime<Utc>,
    ) -> Result<Message, DealError>;

    async fn insert_transaction(
        &self,
        transaction: &PaymentTransaction,
        messages: Vec<NewMessage>,
    ) -> Result<Vec<Message>, DealError>;

    async fn get_transaction(&self, id: TransactionId) -> Result<PaymentTransaction, DealError>;

    async fn transactions_for_connection(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Vec<PaymentTransaction>, DealError>;

    async fn complete_transaction(
        &self,
        completion: TransactionCompletion,
    ) -> Result<SettlementCommit, DealError>;

    async fn ledger_entries(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>, DealError>;
}

#[derive(Debug, Default)]
struct MemoryTables {
    ideas: HashMap<IdeaId, Idea>,
    connections: HashMap<ConnectionId, Connection>,
    messages: HashMap<ConnectionId, Vec<Message>>,
    transactions: HashMap<TransactionId, PaymentTransaction>,
    ledgers: HashMap<IdeaId, IdeaLedger>,
}

impl MemoryTables {
    fn next_message(&self, message: NewMessage, offset: u64) -> Message {
        let seq = self
            .messages
            .get(&message.connection_id)
            .map(|log| log.len() as u64)
            .unwrap_or(0)
            + offset
            + 1;
        Message {
            id: MessageId::generate(),
            connection_id: message.connection_id,
            seq,
            sender_id: message.sender_id,
            message_type: message.content.message_type(),
            content: message.content,
            read: false,
            read_at: None,
            created_at: Utc::now(),
        }
    }

    fn push_messages(&mut self, messages: &[Message]) {
        for message in messages {
            self.messages
                .entry(message.connection_id)
                .or_default()
                .push(message.clone());
        }
    }

    /// Build the sealed entry and the idea snapshot it produces without
    /// mutating anything.
    fn prepare_entry(&self, draft: LedgerDraft) -> Result<(LedgerEntry, Idea), DealError> {
        let mut idea = self
            .ideas
            .get(&draft.idea_id)
            .cloned()
            .ok_or_else(|| DealError::not_found("idea", draft.idea_id))?;
        if draft.credits_idea() {
            idea.credit(draft.amount)?;
        }
        let entry = self
            .ledgers
            .get(&draft.idea_id)
            .map(|ledger| ledger.build_entry(draft.clone()))
            .unwrap_or_else(|| IdeaLedger::new().build_entry(draft));
        Ok((entry, idea))
    }

    fn commit_entry(&mut self, entry: LedgerEntry, idea: Idea) -> Result<(), DealError> {
        self.ledgers
            .entry(entry.idea_id)
            .or_default()
            .commit_entry(entry)?;
        self.ideas.insert(idea.id, idea);
        Ok(())
    }
}

/// In-process store. A single lock over all tables makes every method one
/// atomic unit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<MemoryTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DealStore for MemoryStore {
    fn backend_label(&self) -> &'static str {
        "memory"
    }

    async fn insert_idea(&self, idea: &Idea) -> Result<(), DealError> {
        let mut tables = self.tables.lock().await;
        if tables.ideas.contains_key(&idea.id) {
            return Err(DealError::InvalidState(format!(
                "idea '{}' already exists",
                idea.id
            )));
        }
        tables.ideas.insert(idea.id, idea.clone());
        Ok(())
    }

    async fn get_idea(&self, id: IdeaId) -> Result<Idea, DealError> {
        let tables = self.tables.lock().await;
        tables
            .ideas
            .get(&id)
            .cloned()
            .ok_or_else(|| DealError::not_found("idea", id))
    }

    async fn insert_connection(&self, connection: &Connection) -> Result<(), DealError> {
        let mut tables = self.tables.lock().await;
        let duplicate = tables.connections.values().any(|existing| {
            existing.idea_id == connection.idea_id
                && existing.investor_id == connection.investor_id
                && existing.status != ConnectionStatus::Rejected
        });
        if duplicate {
            return Err(DealError::InvalidState(format!(
                "investor '{}' already has an open connection on idea '{}'",
                connection.investor_id, connection.idea_id
            )));
        }
        tables.connections.insert(connection.id, connection.clone());
        Ok(())
    }

    async fn get_connection(&self, id: ConnectionId) -> Result<Connection, DealError> {
        let tables = self.tables.lock().await;
        tables
            .connections
            .get(&id)
            .cloned()
            .ok_or_else(|| DealError::not_found("connection", id))
    }

    async fn connections_for_user(&self, user_id: &UserId) -> Result<Vec<Connection>, DealError> {
        let tables = self.tables.lock().await;
        let mut connections: Vec<Connection> = tables
            .connections
            .values()
            .filter(|conn| conn.founder_id == *user_id || conn.investor_id == *user_id)
            .cloned()
            .collect();
        connections.sort_by_key(|conn| conn.created_at);
        Ok(connections)
    }

    async fn commit_connection(
        &self,
        change: ConnectionChange,
    ) -> Result<ConnectionCommit, DealError> {
        let mut tables = self.tables.lock().await;
        let current = tables
            .connections
            .get(&change.next.id)
            .ok_or_else(|| DealError::not_found("connection", change.next.id))?;
        let current_guard = current.guard();
        if current_guard != change.expected {
            return Err(DealError::StaleState(format!(
                "connection '{}' is '{}', expected '{}'",
                current.id, current_guard, change.expected
            )));
        }
        let mut next = change.next;
        next.version = current_guard.version + 1;

        let prepared = change
            .ledger
            .map(|draft| tables.prepare_entry(draft))
            .transpose()?;
        let message = change.message.map(|message| tables.next_message(message, 0));

        let (entry, idea) = match prepared {
            Some((entry, idea)) => {
                tables.commit_entry(entry.clone(), idea.clone())?;
                (Some(entry), Some(idea))
            }
            None => (None, None),
        };
        if let Some(message) = &message {
            tables.push_messages(std::slice::from_ref(message));
        }
        tables.connections.insert(next.id, next.clone());

        Ok(ConnectionCommit {
            connection: next,
            message,
            entry,
            idea,
        })
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message, DealError> {
        let mut tables = self.tables.lock().await;
        if !tables.connections.contains_key(&message.connection_id) {
            return Err(DealError::not_found("connection", message.connection_id));
        }
        let message = tables.next_message(message, 0);
        tables.push_messages(std::slice::from_ref(&message));
        Ok(message)
    }

    async fn messages(
        &self,
        connection_id: ConnectionId,
        after_seq: Option<u64>,
    ) -> Result<Vec<Message>, DealError> {
        let tables = self.tables.lock().await;
        let after = after_seq.unwrap_or(0);
        Ok(tables
            .messages
            .get(&connection_id)
            .map(|log| {
                log.iter()
                    .filter(|message| message.seq > after)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn mark_read(
        &self,
        connection_id: ConnectionId,
        message_id: MessageId,
        read_at: DateTime<Utc>,
    ) -> Result<Message, DealError> {
        let mut tables = self.tables.lock().await;
        let message = tables
            .messages
            .get_mut(&connection_id)
            .and_then(|log| log.iter_mut().find(|message| message.id == message_id))
            .ok_or_else(|| DealError::not_found("message", message_id))?;
        if !message.read {
            message.read = true;
            message.read_at = Some(read_at);
        }
        Ok(message.clone())
    }

    async fn insert_transaction(
        &self,
        transaction: &PaymentTransaction,
        messages: Vec<NewMessage>,
    ) -> Result<Vec<Message>, DealError> {
        let mut tables = self.tables.lock().await;
        if !tables.connections.contains_key(&transaction.connection_id) {
            return Err(DealError::not_found("connection", transaction.connection_id));
        }
        let messages: Vec<Message> = messages
            .into_iter()
            .enumerate()
            .map(|(offset, message)| tables.next_message(message, offset as u64))
            .collect();
        tables
            .transactions
            .insert(transaction.id, transaction.clone());
        tables.push_messages(&messages);
        Ok(messages)
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<PaymentTransaction, DealError> {
        let tables = self.tables.lock().await;
        tables
            .transactions
            .get(&id)
            .cloned()
            .ok_or_else(|| DealError::not_found("transaction", id))
    }

    async fn transactions_for_connection(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Vec<PaymentTransaction>, DealError> {
        let tables = self.tables.lock().await;
        let mut transactions: Vec<PaymentTransaction> = tables
            .transactions
            .values()
            .filter(|tx| tx.connection_id == connection_id)
            .cloned()
            .collect();
        transactions.sort_by_key(|tx| tx.initiator_confirmed_at);
        Ok(transactions)
    }

    async fn complete_transaction(
        &self,
        completion: TransactionCompletion,
    ) -> Result<SettlementCommit, DealError> {
        let mut tables = self.tables.lock().await;
        let mut transaction = tables
            .transactions
            .get(&completion.transaction_id)
            .cloned()
            .ok_or_else(|| DealError::not_found("transaction", completion.transaction_id))?;
        if transaction.status != TransactionStatus::InitiatorConfirmed {
            return Err(DealError::AlreadyCompleted(transaction.id.to_string()));
        }

        let (entry, idea) = tables.prepare_entry(completion.ledger)?;
        let messages: Vec<Message> = completion
            .messages
            .into_iter()
            .enumerate()
            .map(|(offset, message)| tables.next_message(message, offset as u64))
            .collect();

        let credits_idea = entry.kind == LedgerEntryKind::InvestmentRecord;
        tables.commit_entry(entry.clone(), idea.clone())?;
        transaction.status = TransactionStatus::Completed;
        transaction.payee_confirmed_at = Some(completion.confirmed_at);
        tables
            .transactions
            .insert(transaction.id, transaction.clone());
        tables.push_messages(&messages);

        Ok(SettlementCommit {
            transaction,
            entry,
            messages,
            idea: credits_idea.then_some(idea),
        })
    }

    async fn ledger_entries(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>, DealError> {
        let tables = self.tables.lock().await;
        let mut entries: Vec<LedgerEntry> = tables
            .ledgers
            .values()
            .flat_map(|ledger| ledger.entries().iter())
            .filter(|entry| query.matches(entry))
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.recorded_at);
        Ok(entries)
    }
}
