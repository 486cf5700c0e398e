use crate::error::DealError;
use crate::ledger::LedgerDraft;
use crate::messaging::MessagingChannel;
use crate::notify::NotificationFanout;
use crate::ports::{BlobStore, PayoutRegistry, RealtimeEvent};
use crate::role::Party;
use crate::store::{DealStore, SettlementCommit, TransactionCompletion};
use crate::types::{
    Amount, Connection, MessageContent, NewMessage, PaymentDirection, PaymentInstructions,
    PaymentTransaction, TransactionId, TransactionStatus, UserId,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use url::Url;

/// Payer-visible stages of one settlement attempt, in order. Only the last
/// two are persisted; `initiate` hands out `QrDisplayed`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStage {
    /// Amount entry, before any instructions exist.
    #[default]
    Input,
    QrDisplayed,
    InitiatorConfirmed,
    Completed,
}

impl SettlementStage {
    pub fn name(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::QrDisplayed => "qr_displayed",
            Self::InitiatorConfirmed => "initiator_confirmed",
            Self::Completed => "completed",
        }
    }

    pub fn of(transaction: &PaymentTransaction) -> Self {
        match transaction.status {
            TransactionStatus::InitiatorConfirmed => Self::InitiatorConfirmed,
            TransactionStatus::Completed => Self::Completed,
        }
    }
}

/// Uploaded evidence of an out-of-band payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentProof {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub file_name: Option<String>,
}

impl PaymentProof {
    /// The content type is reduced to a lowercase `type/subtype`.
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            content_type: normalize_content_type(&content_type.into()),
            file_name: None,
        }
    }

    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }
}

fn normalize_content_type(raw: &str) -> String {
    raw.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Limits applied to proofs before they reach blob storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofPolicy {
    pub max_bytes: usize,
    /// Exact types or `type/*` wildcards.
    pub accepted_content_types: Vec<String>,
}

impl Default for ProofPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            accepted_content_types: vec!["image/*".to_string(), "application/pdf".to_string()],
        }
    }
}

impl ProofPolicy {
    pub fn validate(&self, proof: &PaymentProof) -> Result<(), DealError> {
        if proof.bytes.is_empty() {
            return Err(DealError::InvalidProof("proof is empty".to_string()));
        }
        if proof.bytes.len() > self.max_bytes {
            return Err(DealError::InvalidProof(format!(
                "proof is {} bytes, limit is {}",
                proof.bytes.len(),
                self.max_bytes
            )));
        }
        let content_type = proof.content_type.as_str();
        let accepted = self.accepted_content_types.iter().any(|pattern| {
            match pattern.strip_suffix("/*") {
                Some(prefix) => content_type
                    .split_once('/')
                    .is_some_and(|(major, minor)| major == prefix && !minor.is_empty()),
                None => content_type == pattern.as_str(),
            }
        });
        if !accepted {
            return Err(DealError::InvalidProof(format!(
                "content type '{}' is not accepted",
                proof.content_type
            )));
        }
        Ok(())
    }
}

/// Build a UPI-style deep link: `<scheme>://pay?pa=..&am=..&cu=..&tn=..`.
pub fn payment_uri(
    scheme: &str,
    handle: &str,
    amount: Amount,
    currency: &str,
    note: &str,
) -> Result<String, DealError> {
    let mut uri = Url::parse(&format!("{scheme}://pay"))
        .map_err(|e| DealError::InvalidInput(format!("invalid payment scheme '{scheme}': {e}")))?;
    let major = format!("{}.{:02}", amount.minor() / 100, amount.minor() % 100);
    uri.query_pairs_mut()
        .append_pair("pa", handle)
        .append_pair("am", &major)
        .append_pair("cu", currency)
        .append_pair("tn", note);
    Ok(uri.to_string())
}

fn deal_redirect(connection: &Connection) -> String {
    format!("/deals/{}", connection.id)
}

/// Dual-confirmation payment workflow, mirror-symmetric over
/// [`PaymentDirection`]. Only the payee's confirmation mints a ledger entry.
#[derive(Clone)]
pub struct SettlementWorkflow {
    store: Arc<dyn DealStore>,
    blobs: Arc<dyn BlobStore>,
    payouts: Arc<dyn PayoutRegistry>,
    channel: MessagingChannel,
    fanout: NotificationFanout,
    currency: String,
    uri_scheme: String,
    proof_policy: ProofPolicy,
}

impl SettlementWorkflow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn DealStore>,
        blobs: Arc<dyn BlobStore>,
        payouts: Arc<dyn PayoutRegistry>,
        channel: MessagingChannel,
        fanout: NotificationFanout,
        currency: impl Into<String>,
        uri_scheme: impl Into<String>,
        proof_policy: ProofPolicy,
    ) -> Self {
        Self {
            store,
            blobs,
            payouts,
            channel,
            fanout,
            currency: currency.into(),
            uri_scheme: uri_scheme.into(),
            proof_policy,
        }
    }

    fn payer_of_record(
        direction: PaymentDirection,
        connection: &Connection,
        actor: &UserId,
        operation: &str,
    ) -> Result<Party, DealError> {
        let party = Party::resolve(connection, actor)?;
        party.require(direction.payer_role(), operation)?;
        if !connection.status.is_active() {
            return Err(DealError::InvalidState(format!(
                "{operation} requires an accepted connection, '{}' is '{}'",
                connection.id,
                connection.status.as_str()
            )));
        }
        Ok(party)
    }

    /// Instructions for the QR step. Pure read; nothing is persisted.
    pub async fn initiate(
        &self,
        direction: PaymentDirection,
        connection: &Connection,
        amount_minor: i64,
        actor: &UserId,
    ) -> Result<PaymentInstructions, DealError> {
        let amount = Amount::new(amount_minor)?;
        let payer = Self::payer_of_record(direction, connection, actor, "initiate_payment")?;
        let payee_id = payer.counterpart_id(connection).clone();
        let payee_handle = self
            .payouts
            .lookup(&payee_id)
            .await?
            .ok_or_else(|| DealError::MissingPayoutHandle(payee_id.to_string()))?;

        let note = match direction {
            PaymentDirection::Investment => format!("Investment {}", connection.id),
            PaymentDirection::Profit => format!("Profit share {}", connection.id),
        };
        let payment_uri = payment_uri(&self.uri_scheme, &payee_handle, amount, &self.currency, &note)?;

        Ok(PaymentInstructions {
            connection_id: connection.id,
            direction,
            payer_id: payer.user_id,
            payee_id,
            payee_handle,
            amount,
            currency: self.currency.clone(),
            note,
            payment_uri,
            stage: SettlementStage::QrDisplayed,
        })
    }

    /// Payer claims the money was sent. Stores the proof, records the
    /// transaction as `initiator_confirmed`, posts text and proof messages and
    /// alerts the payee. No ledger or aggregate change.
    pub async fn record_initiator_confirmation(
        &self,
        direction: PaymentDirection,
        connection: &Connection,
        amount_minor: i64,
        proof: PaymentProof,
        actor: &UserId,
    ) -> Result<PaymentTransaction, DealError> {
        let amount = Amount::new(amount_minor)?;
        let payer = Self::payer_of_record(direction, connection, actor, "confirm_payment_sent")?;
        self.proof_policy.validate(&proof)?;

        let payee_id = payer.counterpart_id(connection).clone();
        let proof_url = self.blobs.put(&proof.bytes, &proof.content_type).await?;

        let transaction = PaymentTransaction {
            id: TransactionId::generate(),
            connection_id: connection.id,
            idea_id: connection.idea_id,
            direction,
            payer_id: payer.user_id.clone(),
            payee_id: payee_id.clone(),
            amount,
            proof_url: proof_url.clone(),
            status: TransactionStatus::InitiatorConfirmed,
            initiator_confirmed_at: Utc::now(),
            payee_confirmed_at: None,
        };

        let shown = amount.display(&self.currency);
        let summary = match direction {
            PaymentDirection::Investment => format!(
                "Investment payment of {shown} sent. Awaiting confirmation from the founder."
            ),
            PaymentDirection::Profit => format!(
                "Profit share payment of {shown} sent. Awaiting confirmation from the investor."
            ),
        };
        let evidence = if proof.is_image() {
            MessageContent::Image {
                url: proof_url,
                caption: Some("Payment proof".to_string()),
            }
        } else {
            MessageContent::Attachment {
                url: proof_url,
                file_name: proof
                    .file_name
                    .clone()
                    .unwrap_or_else(|| "payment-proof".to_string()),
                content_type: proof.content_type.clone(),
            }
        };
        let messages = vec![
            NewMessage::text(connection.id, payer.user_id.clone(), summary.clone()),
            NewMessage::new(connection.id, payer.user_id.clone(), evidence),
        ];

        let posted = self.store.insert_transaction(&transaction, messages).await?;
        info!(
            connection = %connection.id,
            transaction = %transaction.id,
            direction = direction.as_str(),
            amount = amount.minor(),
            "Payment recorded by payer"
        );

        self.channel.publish(RealtimeEvent::Transaction {
            transaction: transaction.clone(),
        });
        self.channel.publish_messages(&posted);
        self.fanout
            .notify(
                &payee_id,
                "Payment awaiting your confirmation",
                summary,
                deal_redirect(connection),
            )
            .await;

        Ok(transaction)
    }

    /// Payee confirms receipt. Completes the transaction and mints its ledger
    /// entry in one unit; a second call fails with `AlreadyCompleted` and
    /// changes nothing.
    pub async fn confirm_receipt(
        &self,
        transaction_id: TransactionId,
        actor: &UserId,
    ) -> Result<SettlementCommit, DealError> {
        let transaction = self.store.get_transaction(transaction_id).await?;
        let connection = self.store.get_connection(transaction.connection_id).await?;
        let party = Party::resolve(&connection, actor)?;
        party.require(transaction.direction.payee_role(), "confirm_receipt")?;
        if SettlementStage::of(&transaction) != SettlementStage::InitiatorConfirmed {
            return Err(DealError::AlreadyCompleted(transaction.id.to_string()));
        }

        let shown = transaction.amount.display(&self.currency);
        let (ledger, confirmation) = match transaction.direction {
            PaymentDirection::Investment => (
                LedgerDraft::investment(
                    &connection,
                    transaction.amount,
                    Some(transaction.id),
                    format!("Investment of {shown} verified by founder"),
                ),
                format!("Investment payment of {shown} confirmed as received."),
            ),
            PaymentDirection::Profit => (
                LedgerDraft::profit_share(
                    &connection,
                    transaction.amount,
                    transaction.id,
                    format!("Profit share of {shown} verified by investor"),
                ),
                format!("Profit share payment of {shown} confirmed as received."),
            ),
        };

        let commit = self
            .store
            .complete_transaction(TransactionCompletion {
                transaction_id,
                confirmed_at: Utc::now(),
                ledger,
                messages: vec![NewMessage::text(
                    connection.id,
                    party.user_id.clone(),
                    confirmation.clone(),
                )],
            })
            .await?;

        info!(
            connection = %connection.id,
            transaction = %transaction_id,
            entry = %commit.entry.id,
            amount = transaction.amount.minor(),
            "Payment confirmed by payee"
        );

        self.channel.publish(RealtimeEvent::Transaction {
            transaction: commit.transaction.clone(),
        });
        self.channel.publish_messages(&commit.messages);
        self.fanout
            .notify(
                &transaction.payer_id,
                "Payment confirmed",
                confirmation,
                deal_redirect(&connection),
            )
            .await;

        Ok(commit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proof_policy_checks_size_and_type() {
        let policy = ProofPolicy {
            max_bytes: 4,
            ..ProofPolicy::default()
        };
        assert!(policy.validate(&PaymentProof::new(vec![1, 2], "image/png")).is_ok());
        assert!(policy
            .validate(&PaymentProof::new(vec![1], "application/pdf"))
            .is_ok());
        assert!(matches!(
            policy.validate(&PaymentProof::new(Vec::new(), "image/png")),
            Err(DealError::InvalidProof(_))
        ));
        assert!(policy
            .validate(&PaymentProof::new(vec![0; 5], "image/png"))
            .is_err());
        assert!(policy
            .validate(&PaymentProof::new(vec![1], "text/html"))
            .is_err());
        assert!(policy.validate(&PaymentProof::new(vec![1], "image/")).is_err());
    }

    #[test]
    fn payment_uri_carries_query_fields() {
        let uri = payment_uri(
            "upi",
            "founder@okbank",
            Amount::new(2_000_000).unwrap(),
            "INR",
            "Investment 42",
        )
        .unwrap();
        assert!(uri.starts_with("upi://pay?"));
        assert!(uri.contains("pa=founder%40okbank"));
        assert!(uri.contains("am=20000.00"));
        assert!(uri.contains("cu=INR"));
        assert!(uri.contains("tn=Investment+42"));
    }

    #[test]
    fn stage_names_are_stable() {
        assert_eq!(SettlementStage::QrDisplayed.name(), "qr_displayed");
        assert_eq!(SettlementStage::Completed.name(), "completed");
    }

    #[test]
    fn stages_advance_from_input() {
        assert_eq!(SettlementStage::default(), SettlementStage::Input);
        assert!(SettlementStage::Input < SettlementStage::QrDisplayed);
        assert!(SettlementStage::QrDisplayed < SettlementStage::InitiatorConfirmed);
        assert!(SettlementStage::InitiatorConfirmed < SettlementStage::Completed);
    }

    #[test]
    fn proof_content_type_is_normalized_once() {
        let proof = PaymentProof::new(vec![1, 2, 3], " IMAGE/PNG; name=receipt");
        assert_eq!(proof.content_type, "image/png");
        assert!(proof.is_image());
        assert!(ProofPolicy::default().validate(&proof).is_ok());

        let pdf = PaymentProof::new(vec![1], "Application/PDF");
        assert!(!pdf.is_image());
        assert!(ProofPolicy::default().validate(&pdf).is_ok());
    }
}
