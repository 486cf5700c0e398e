//! Dealroom core: founder/investor negotiation and dual-confirmation payment
//! settlement.
//!
//! Connections gate who may negotiate, the negotiation machine moves offers,
//! and only a payee's confirmation (or an instant accept) mints a ledger entry.
//! Every ledger entry and its aggregate increment commit atomically with the
//! state change that caused it.

#![deny(unsafe_code)]

pub mod engine;
pub mod error;
pub mod ledger;
pub mod messaging;
pub mod negotiation;
pub mod notify;
pub mod ports;
pub mod postgres;
pub mod role;
pub mod settlement;
pub mod store;
pub mod types;

pub use engine::{
    AggregateCheck, ChainCheck, DealEngine, DealEngineConfig, DealPorts, DealSummary, DealUpdate,
};
pub use error::{DealError, ErrorKind};
pub use ledger::{IdeaLedger, LedgerDraft, LedgerEntry, LedgerEntryKind, LedgerSummary, Provenance};
pub use messaging::MessagingChannel;
pub use negotiation::{NegotiationAction, NegotiationMachine, Notice, Transition};
pub use notify::NotificationFanout;
pub use ports::{
    BlobStore, BroadcastBus, InMemoryBlobStore, InMemoryNotifier, InMemoryPayoutRegistry,
    Notifier, PayoutRegistry, RealtimeBus, RealtimeEvent,
};
pub use postgres::PostgresStore;
pub use role::{Party, Role};
pub use settlement::{payment_uri, PaymentProof, ProofPolicy, SettlementStage, SettlementWorkflow};
pub use store::{
    ConnectionChange, ConnectionCommit, DealStore, LedgerQuery, MemoryStore, SettlementCommit,
    StoreConfig, TransactionCompletion,
};
pub use types::{
    Amount, Connection, ConnectionGuard, ConnectionId, ConnectionStatus, DealStatus, Idea, IdeaId,
    IdeaStatus, LedgerEntryId, Message, MessageContent, MessageId, MessageType, NewMessage,
    Notification, NotificationId, PaymentDirection, PaymentInstructions, PaymentTransaction,
    TransactionId, TransactionStatus, UserId,
};
