use crate::error::DealError;
use crate::types::{Amount, Connection, ConnectionId, IdeaId, LedgerEntryId, TransactionId, UserId};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Ledger entry types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryKind {
    InvestmentRecord,
    ProfitShare,
}

impl LedgerEntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvestmentRecord => "investment_record",
            Self::ProfitShare => "profit_share",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DealError> {
        match value {
            "investment_record" => Ok(Self::InvestmentRecord),
            "profit_share" => Ok(Self::ProfitShare),
            other => Err(DealError::Serialization(format!(
                "unknown ledger kind '{other}'"
            ))),
        }
    }
}

/// How an entry came to exist. Reports keep the two apart.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Founder accepted an offer without payment proof.
    InstantAccept,
    /// Payee confirmed a proof-backed payment transaction.
    VerifiedPayment,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InstantAccept => "instant_accept",
            Self::VerifiedPayment => "verified_payment",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DealError> {
        match value {
            "instant_accept" => Ok(Self::InstantAccept),
            "verified_payment" => Ok(Self::VerifiedPayment),
            other => Err(DealError::Serialization(format!(
                "unknown ledger provenance '{other}'"
            ))),
        }
    }
}

/// Entry content before the store assigns its chain position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerDraft {
    pub kind: LedgerEntryKind,
    pub idea_id: IdeaId,
    pub connection_id: ConnectionId,
    pub founder_id: UserId,
    pub investor_id: UserId,
    pub amount: Amount,
    pub transaction_id: Option<TransactionId>,
    pub description: String,
}

impl LedgerDraft {
    pub fn investment(
        connection: &Connection,
        amount: Amount,
        transaction_id: Option<TransactionId>,
        description: impl Into<String>,
    ) -> Self {
        Self::for_connection(
            LedgerEntryKind::InvestmentRecord,
            connection,
            amount,
            transaction_id,
            description,
        )
    }

    pub fn profit_share(
        connection: &Connection,
        amount: Amount,
        transaction_id: TransactionId,
        description: impl Into<String>,
    ) -> Self {
        Self::for_connection(
            LedgerEntryKind::ProfitShare,
            connection,
            amount,
            Some(transaction_id),
            description,
        )
    }

    fn for_connection(
        kind: LedgerEntryKind,
        connection: &Connection,
        amount: Amount,
        transaction_id: Option<TransactionId>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            idea_id: connection.idea_id,
            connection_id: connection.id,
            founder_id: connection.founder_id.clone(),
            investor_id: connection.investor_id.clone(),
            amount,
            transaction_id,
            description: description.into(),
        }
    }

    pub fn provenance(&self) -> Provenance {
        if self.transaction_id.is_some() {
            Provenance::VerifiedPayment
        } else {
            Provenance::InstantAccept
        }
    }

    /// Whether committing this entry moves the idea's investment aggregate.
    pub fn credits_idea(&self) -> bool {
        self.kind == LedgerEntryKind::InvestmentRecord
    }

    /// Seal the draft at `index` on its idea's chain.
    pub fn seal(self, index: u64, previous_hash: Option<String>) -> LedgerEntry {
        let provenance = self.provenance();
        let mut entry = LedgerEntry {
            id: LedgerEntryId::generate(),
            index,
            kind: self.kind,
            idea_id: self.idea_id,
            connection_id: self.connection_id,
            founder_id: self.founder_id,
            investor_id: self.investor_id,
            amount: self.amount,
            transaction_id: self.transaction_id,
            provenance,
            description: self.description,
            // Microsecond precision survives a round-trip through TIMESTAMPTZ.
            recorded_at: Utc::now().trunc_subsecs(6),
            previous_hash,
            entry_hash: String::new(),
        };
        entry.entry_hash = compute_entry_hash(&entry);
        entry
    }
}

/// Immutable, hash-chained ledger row. Chains are per idea.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub index: u64,
    pub kind: LedgerEntryKind,
    pub idea_id: IdeaId,
    pub connection_id: ConnectionId,
    pub founder_id: UserId,
    pub investor_id: UserId,
    pub amount: Amount,
    pub transaction_id: Option<TransactionId>,
    pub provenance: Provenance,
    pub description: String,
    pub recorded_at: DateTime<Utc>,
    pub previous_hash: Option<String>,
    pub entry_hash: String,
}

/// Append-only chain of ledger entries for a single idea.
///
/// No in-place mutation APIs are exposed; every confirmed movement is one
/// more record.
#[derive(Debug, Default, Clone)]
pub struct IdeaLedger {
    entries: Vec<LedgerEntry>,
}

impl IdeaLedger {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Rebuild from persisted entries and verify chain integrity.
    pub fn from_entries(entries: Vec<LedgerEntry>) -> Result<Self, DealError> {
        for (expected_index, entry) in entries.iter().enumerate() {
            if entry.index != expected_index as u64 {
                return Err(DealError::Store(format!(
                    "ledger index gap detected at position {} (found {})",
                    expected_index, entry.index
                )));
            }
        }

        if !verify_chain(&entries) {
            return Err(DealError::Store(
                "persisted ledger hash-chain verification failed".to_string(),
            ));
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn next_index(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn head_hash(&self) -> Option<String> {
        self.entries.last().map(|entry| entry.entry_hash.clone())
    }

    /// Build the next entry without mutating the chain.
    pub fn build_entry(&self, draft: LedgerDraft) -> LedgerEntry {
        draft.seal(self.next_index(), self.head_hash())
    }

    /// Commit a pre-built entry after external durability succeeds.
    pub fn commit_entry(&mut self, entry: LedgerEntry) -> Result<(), DealError> {
        let expected_index = self.next_index();
        if entry.index != expected_index {
            return Err(DealError::Store(format!(
                "commit index mismatch: expected {}, got {}",
                expected_index, entry.index
            )));
        }

        if entry.previous_hash != self.head_hash() {
            return Err(DealError::Store(
                "commit previous hash mismatch".to_string(),
            ));
        }

        if entry.entry_hash != compute_entry_hash(&entry) {
            return Err(DealError::Store(
                "commit hash mismatch for ledger entry".to_string(),
            ));
        }

        self.entries.push(entry);
        Ok(())
    }

    pub fn append(&mut self, draft: LedgerDraft) -> Result<LedgerEntry, DealError> {
        let entry = self.build_entry(draft);
        self.commit_entry(entry.clone())?;
        Ok(entry)
    }

    pub fn verify_chain(&self) -> bool {
        verify_chain(&self.entries)
    }
}

/// Verify a single idea's chain, ordered by index.
pub fn verify_chain(entries: &[LedgerEntry]) -> bool {
    let mut previous_hash: Option<String> = None;
    for entry in entries {
        if entry.previous_hash != previous_hash {
            return false;
        }
        if entry.entry_hash != compute_entry_hash(entry) {
            return false;
        }
        previous_hash = Some(entry.entry_hash.clone());
    }
    true
}

fn compute_entry_hash(entry: &LedgerEntry) -> String {
    let material = serde_json::json!({
        "id": entry.id,
        "index": entry.index,
        "kind": entry.kind,
        "idea_id": entry.idea_id,
        "connection_id": entry.connection_id,
        "founder_id": entry.founder_id,
        "investor_id": entry.investor_id,
        "amount": entry.amount,
        "transaction_id": entry.transaction_id,
        "provenance": entry.provenance,
        "description": entry.description,
        "recorded_at": entry.recorded_at,
        "previous_hash": entry.previous_hash,
    });

    let bytes = serde_json::to_vec(&material).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}

/// Totals derived purely from confirmed ledger rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LedgerSummary {
    pub total_invested_minor: i64,
    pub verified_invested_minor: i64,
    pub instant_invested_minor: i64,
    pub total_profit_minor: i64,
    /// Profit as a percentage of invested capital; absent before any investment.
    pub roi_percent: Option<f64>,
    pub investment_entries: usize,
    pub profit_entries: usize,
}

impl LedgerSummary {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Self {
        let mut summary = Self::default();
        for entry in entries {
            let amount = entry.amount.minor();
            match entry.kind {
                LedgerEntryKind::InvestmentRecord => {
                    summary.total_invested_minor = summary.total_invested_minor.saturating_add(amount);
                    summary.investment_entries += 1;
                    let bucket = match entry.provenance {
                        Provenance::VerifiedPayment => &mut summary.verified_invested_minor,
                        Provenance::InstantAccept => &mut summary.instant_invested_minor,
                    };
                    *bucket = bucket.saturating_add(amount);
                }
                LedgerEntryKind::ProfitShare => {
                    // Profit is unbounded by the aggregate, so reports clamp instead of wrapping.
                    summary.total_profit_minor = summary.total_profit_minor.saturating_add(amount);
                    summary.profit_entries += 1;
                }
            }
        }

        if summary.total_invested_minor > 0 {
            summary.roi_percent = Some(
                summary.total_profit_minor as f64 / summary.total_invested_minor as f64 * 100.0,
            );
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Idea;

    fn connection() -> Connection {
        let idea = Idea::new(UserId::new("founder-1"), "cold chain");
        Connection::pending(&idea, UserId::new("investor-1"), None)
    }

    #[test]
    fn verifies_hash_chain() {
        let conn = connection();
        let mut ledger = IdeaLedger::new();
        ledger
            .append(LedgerDraft::investment(
                &conn,
                Amount::new(5_000_000).unwrap(),
                None,
                "proposal accepted",
            ))
            .unwrap();
        ledger
            .append(LedgerDraft::profit_share(
                &conn,
                Amount::new(250_000).unwrap(),
                TransactionId::generate(),
                "quarterly profit",
            ))
            .unwrap();

        assert_eq!(ledger.entries()[1].index, 1);
        assert!(ledger.verify_chain());
    }

    #[test]
    fn detects_tampered_entries() {
        let conn = connection();
        let mut ledger = IdeaLedger::new();
        ledger
            .append(LedgerDraft::investment(
                &conn,
                Amount::new(100).unwrap(),
                None,
                "seed",
            ))
            .unwrap();

        let mut entries = ledger.entries().to_vec();
        entries[0].amount = Amount::new(1_000_000).unwrap();

        assert!(!verify_chain(&entries));
        assert!(IdeaLedger::from_entries(entries).is_err());
    }

    #[test]
    fn rejects_out_of_order_commit() {
        let conn = connection();
        let mut ledger = IdeaLedger::new();
        let first = ledger.build_entry(LedgerDraft::investment(
            &conn,
            Amount::new(100).unwrap(),
            None,
            "a",
        ));
        let stale = ledger.build_entry(LedgerDraft::investment(
            &conn,
            Amount::new(200).unwrap(),
            None,
            "b",
        ));
        ledger.commit_entry(first).unwrap();
        assert!(ledger.commit_entry(stale).is_err());
    }

    #[test]
    fn summary_separates_provenance_and_computes_roi() {
        let conn = connection();
        let mut ledger = IdeaLedger::new();
        ledger
            .append(LedgerDraft::investment(
                &conn,
                Amount::new(3_000_000).unwrap(),
                None,
                "instant",
            ))
            .unwrap();
        ledger
            .append(LedgerDraft::investment(
                &conn,
                Amount::new(1_000_000).unwrap(),
                Some(TransactionId::generate()),
                "verified",
            ))
            .unwrap();
        ledger
            .append(LedgerDraft::profit_share(
                &conn,
                Amount::new(400_000).unwrap(),
                TransactionId::generate(),
                "profit",
            ))
            .unwrap();

        let summary = LedgerSummary::from_entries(ledger.entries());
        assert_eq!(summary.total_invested_minor, 4_000_000);
        assert_eq!(summary.instant_invested_minor, 3_000_000);
        assert_eq!(summary.verified_invested_minor, 1_000_000);
        assert_eq!(summary.total_profit_minor, 400_000);
        assert_eq!(summary.roi_percent, Some(10.0));
    }

    #[test]
    fn summary_has_no_roi_without_investment() {
        let summary = LedgerSummary::from_entries(Vec::<LedgerEntry>::new().iter());
        assert_eq!(summary.roi_percent, None);
        assert_eq!(summary.total_profit_minor, 0);
    }
}
