use crate::error::DealError;
use crate::role::Role;
use crate::settlement::SettlementStage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = DealError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(value).map(Self).map_err(|e| {
                    DealError::InvalidInput(format!(
                        "invalid {} '{}': {e}",
                        stringify!($name),
                        value
                    ))
                })
            }
        }
    };
}

uuid_id!(
    /// Idea owned by a founder; carries the investment aggregate.
    IdeaId
);
uuid_id!(ConnectionId);
uuid_id!(MessageId);
uuid_id!(TransactionId);
uuid_id!(LedgerEntryId);
uuid_id!(NotificationId);

/// Platform user reference. Accounts live outside the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Strictly positive money amount in minor units (paise for INR).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Amount(i64);

impl Amount {
    pub fn new(minor: i64) -> Result<Self, DealError> {
        if minor <= 0 {
            return Err(DealError::InvalidAmount(format!(
                "amount must be greater than zero, got {minor}"
            )));
        }
        Ok(Self(minor))
    }

    pub fn minor(self) -> i64 {
        self.0
    }

    /// Render as `<currency> <major>.<minor>` with thousands separators.
    pub fn display(self, currency: &str) -> String {
        let major = self.0 / 100;
        let minor = self.0 % 100;
        let digits = major.to_string();
        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        for (idx, ch) in digits.chars().enumerate() {
            if idx > 0 && (digits.len() - idx) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(ch);
        }
        format!("{currency} {grouped}.{minor:02}")
    }
}

impl TryFrom<i64> for Amount {
    type Error = DealError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for i64 {
    fn from(value: Amount) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IdeaStatus {
    Open,
    Funded,
}

impl IdeaStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Funded => "funded",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DealError> {
        match value {
            "open" => Ok(Self::Open),
            "funded" => Ok(Self::Funded),
            other => Err(DealError::Serialization(format!(
                "unknown idea status '{other}'"
            ))),
        }
    }
}

/// Idea aggregate. `investment_received_minor` only moves with a confirmed
/// investment ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Idea {
    pub id: IdeaId,
    pub founder_id: UserId,
    pub title: String,
    pub status: IdeaStatus,
    pub investment_received_minor: i64,
    pub created_at: DateTime<Utc>,
}

impl Idea {
    pub fn new(founder_id: UserId, title: impl Into<String>) -> Self {
        Self {
            id: IdeaId::generate(),
            founder_id,
            title: title.into(),
            status: IdeaStatus::Open,
            investment_received_minor: 0,
            created_at: Utc::now(),
        }
    }

    /// Add a confirmed investment to the aggregate and mark the idea funded.
    pub fn credit(&mut self, amount: Amount) -> Result<(), DealError> {
        self.investment_received_minor = self
            .investment_received_minor
            .checked_add(amount.minor())
            .ok_or_else(|| {
                DealError::InvalidAmount(format!(
                    "crediting {} would overflow the aggregate of idea '{}'",
                    amount.minor(),
                    self.id
                ))
            })?;
        self.status = IdeaStatus::Funded;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Pending,
    Accepted,
    Communicating,
    DealPendingInvestor,
    DealDone,
    Rejected,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Communicating => "communicating",
            Self::DealPendingInvestor => "deal_pending_investor",
            Self::DealDone => "deal_done",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DealError> {
        match value {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "communicating" => Ok(Self::Communicating),
            "deal_pending_investor" => Ok(Self::DealPendingInvestor),
            "deal_done" => Ok(Self::DealDone),
            "rejected" => Ok(Self::Rejected),
            other => Err(DealError::Serialization(format!(
                "unknown connection status '{other}'"
            ))),
        }
    }

    /// Chat and negotiation are open once the founder accepted.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Pending | Self::Rejected)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DealStatus {
    None,
    Proposed,
    Requested,
    Rejected,
}

impl DealStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Proposed => "proposed",
            Self::Requested => "requested",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DealError> {
        match value {
            "none" => Ok(Self::None),
            "proposed" => Ok(Self::Proposed),
            "requested" => Ok(Self::Requested),
            "rejected" => Ok(Self::Rejected),
            other => Err(DealError::Serialization(format!(
                "unknown deal status '{other}'"
            ))),
        }
    }

    pub fn is_outstanding(self) -> bool {
        matches!(self, Self::Proposed | Self::Requested)
    }
}

/// Founder/investor pairing around one idea.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Connection {
    pub id: ConnectionId,
    pub idea_id: IdeaId,
    pub founder_id: UserId,
    pub investor_id: UserId,
    pub status: ConnectionStatus,
    pub deal_status: DealStatus,
    pub proposed_amount: Option<Amount>,
    pub note: Option<String>,
    /// Bumped by the store on every committed transition.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    pub fn pending(idea: &Idea, investor_id: UserId, note: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ConnectionId::generate(),
            idea_id: idea.id,
            founder_id: idea.founder_id.clone(),
            investor_id,
            status: ConnectionStatus::Pending,
            deal_status: DealStatus::None,
            proposed_amount: None,
            note,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn party(&self, role: Role) -> &UserId {
        match role {
            Role::Founder => &self.founder_id,
            Role::Investor => &self.investor_id,
        }
    }

    /// Guard used for conditional writes against this snapshot.
    pub fn guard(&self) -> ConnectionGuard {
        ConnectionGuard {
            status: self.status,
            deal_status: self.deal_status,
            proposed_amount: self.proposed_amount,
            version: self.version,
        }
    }
}

/// Expected prior state for a conditional connection update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionGuard {
    pub status: ConnectionStatus,
    pub deal_status: DealStatus,
    pub proposed_amount: Option<Amount>,
    pub version: u64,
}

impl fmt::Display for ConnectionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} v{}",
            self.status.as_str(),
            self.deal_status.as_str(),
            self.version
        )?;
        if let Some(amount) = self.proposed_amount {
            write!(f, " offer {}", amount.minor())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    Attachment,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Attachment => "attachment",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        body: String,
    },
    Image {
        url: String,
        caption: Option<String>,
    },
    Attachment {
        url: String,
        file_name: String,
        content_type: String,
    },
}

impl MessageContent {
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text { body: body.into() }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Text { .. } => MessageType::Text,
            Self::Image { .. } => MessageType::Image,
            Self::Attachment { .. } => MessageType::Attachment,
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Self::Text { body } => body.trim().is_empty(),
            Self::Image { url, .. } | Self::Attachment { url, .. } => url.trim().is_empty(),
        }
    }
}

/// Message as persisted; `seq` is monotonic per connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub connection_id: ConnectionId,
    pub seq: u64,
    pub sender_id: UserId,
    pub message_type: MessageType,
    pub content: MessageContent,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Message waiting for the store to assign id and sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewMessage {
    pub connection_id: ConnectionId,
    pub sender_id: UserId,
    pub content: MessageContent,
}

impl NewMessage {
    pub fn new(connection_id: ConnectionId, sender_id: UserId, content: MessageContent) -> Self {
        Self {
            connection_id,
            sender_id,
            content,
        }
    }

    pub fn text(connection_id: ConnectionId, sender_id: UserId, body: impl Into<String>) -> Self {
        Self::new(connection_id, sender_id, MessageContent::text(body))
    }
}

/// Which way money moves in a settlement workflow.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentDirection {
    /// Investor pays founder.
    Investment,
    /// Founder pays investor.
    Profit,
}

impl PaymentDirection {
    pub fn payer_role(self) -> Role {
        match self {
            Self::Investment => Role::Investor,
            Self::Profit => Role::Founder,
        }
    }

    pub fn payee_role(self) -> Role {
        self.payer_role().counterpart()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Investment => "investment",
            Self::Profit => "profit",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DealError> {
        match value {
            "investment" => Ok(Self::Investment),
            "profit" => Ok(Self::Profit),
            other => Err(DealError::InvalidInput(format!(
                "unknown payment direction '{other}'; expected investment or profit"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    InitiatorConfirmed,
    Completed,
}

impl TransactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InitiatorConfirmed => "initiator_confirmed",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DealError> {
        match value {
            "initiator_confirmed" => Ok(Self::InitiatorConfirmed),
            "completed" => Ok(Self::Completed),
            other => Err(DealError::Serialization(format!(
                "unknown transaction status '{other}'"
            ))),
        }
    }
}

/// Out-of-band payment claim awaiting (or holding) the payee's confirmation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentTransaction {
    pub id: TransactionId,
    pub connection_id: ConnectionId,
    pub idea_id: IdeaId,
    pub direction: PaymentDirection,
    pub payer_id: UserId,
    pub payee_id: UserId,
    pub amount: Amount,
    pub proof_url: String,
    pub status: TransactionStatus,
    pub initiator_confirmed_at: DateTime<Utc>,
    pub payee_confirmed_at: Option<DateTime<Utc>>,
}

/// Instructions rendered to the payer (QR code source) before proof upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentInstructions {
    pub connection_id: ConnectionId,
    pub direction: PaymentDirection,
    pub payer_id: UserId,
    pub payee_id: UserId,
    pub payee_handle: String,
    pub amount: Amount,
    pub currency: String,
    pub note: String,
    pub payment_uri: String,
    pub stage: SettlementStage,
}

/// Advisory alert for a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient_id: UserId,
    pub title: String,
    pub body: String,
    pub redirect: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        recipient_id: UserId,
        title: impl Into<String>,
        body: impl Into<String>,
        redirect: impl Into<String>,
    ) -> Self {
        Self {
            id: NotificationId::generate(),
            recipient_id,
            title: title.into(),
            body: body.into(),
            redirect: redirect.into(),
            read: false,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_rejects_non_positive_values() {
        assert!(Amount::new(0).is_err());
        assert!(Amount::new(-5).is_err());
        assert_eq!(Amount::new(1).unwrap().minor(), 1);
    }

    #[test]
    fn amount_renders_grouped_major_units() {
        let amount = Amount::new(5_000_000).unwrap();
        assert_eq!(amount.display("INR"), "INR 50,000.00");
        assert_eq!(Amount::new(1_234_567_89).unwrap().display("INR"), "INR 1,234,567.89");
        assert_eq!(Amount::new(5).unwrap().display("INR"), "INR 0.05");
    }

    #[test]
    fn amount_deserialization_validates() {
        assert!(serde_json::from_str::<Amount>("-1").is_err());
        assert_eq!(serde_json::from_str::<Amount>("250").unwrap().minor(), 250);
    }

    #[test]
    fn direction_roles_are_mirrored() {
        assert_eq!(PaymentDirection::Investment.payer_role(), Role::Investor);
        assert_eq!(PaymentDirection::Investment.payee_role(), Role::Founder);
        assert_eq!(PaymentDirection::Profit.payer_role(), Role::Founder);
        assert_eq!(PaymentDirection::Profit.payee_role(), Role::Investor);
    }

    #[test]
    fn message_content_is_tagged() {
        let value = serde_json::to_value(MessageContent::text("hi")).unwrap();
        assert_eq!(value["kind"], "text");
        assert_eq!(
            MessageContent::Image {
                url: "mem://x".into(),
                caption: None
            }
            .message_type(),
            MessageType::Image
        );
    }
}
