use crate::error::DealError;
use crate::ledger::{LedgerDraft, LedgerEntry, LedgerEntryKind, Provenance};
use crate::store::{
    ConnectionChange, ConnectionCommit, DealStore, LedgerQuery, SettlementCommit,
    TransactionCompletion,
};
use crate::types::{
    Amount, Connection, ConnectionId, ConnectionStatus, DealStatus, Idea, IdeaId, IdeaStatus,
    LedgerEntryId, Message, MessageContent, MessageId, NewMessage, PaymentDirection,
    PaymentTransaction, TransactionId, TransactionStatus, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS dealroom_ideas (
        id UUID PRIMARY KEY,
        founder_id TEXT NOT NULL,
        title TEXT NOT NULL,
        status TEXT NOT NULL,
        investment_received BIGINT NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS dealroom_connections (
        id UUID PRIMARY KEY,
        idea_id UUID NOT NULL REFERENCES dealroom_ideas (id),
        founder_id TEXT NOT NULL,
        investor_id TEXT NOT NULL,
        status TEXT NOT NULL,
        deal_status TEXT NOT NULL,
        proposed_amount BIGINT NULL,
        note TEXT NULL,
        version BIGINT NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "ALTER TABLE dealroom_connections ADD COLUMN IF NOT EXISTS version BIGINT NOT NULL DEFAULT 0",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_dealroom_connections_open_pair ON dealroom_connections (idea_id, investor_id) WHERE status <> 'rejected'",
    r#"
    CREATE TABLE IF NOT EXISTS dealroom_messages (
        id UUID PRIMARY KEY,
        connection_id UUID NOT NULL REFERENCES dealroom_connections (id),
        seq BIGINT NOT NULL,
        sender_id TEXT NOT NULL,
        message_type TEXT NOT NULL,
        content JSONB NOT NULL,
        is_read BOOLEAN NOT NULL DEFAULT FALSE,
        read_at TIMESTAMPTZ NULL,
        created_at TIMESTAMPTZ NOT NULL,
        UNIQUE (connection_id, seq)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS dealroom_transactions (
        id UUID PRIMARY KEY,
        connection_id UUID NOT NULL REFERENCES dealroom_connections (id),
        idea_id UUID NOT NULL REFERENCES dealroom_ideas (id),
        direction TEXT NOT NULL,
        payer_id TEXT NOT NULL,
        payee_id TEXT NOT NULL,
        amount BIGINT NOT NULL CHECK (amount > 0),
        proof_url TEXT NOT NULL,
        status TEXT NOT NULL,
        initiator_confirmed_at TIMESTAMPTZ NOT NULL,
        payee_confirmed_at TIMESTAMPTZ NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS dealroom_ledger_entries (
        id UUID PRIMARY KEY,
        idea_id UUID NOT NULL REFERENCES dealroom_ideas (id),
        ledger_index BIGINT NOT NULL,
        kind TEXT NOT NULL,
        connection_id UUID NOT NULL REFERENCES dealroom_connections (id),
        founder_id TEXT NOT NULL,
        investor_id TEXT NOT NULL,
        amount BIGINT NOT NULL CHECK (amount > 0),
        transaction_id UUID NULL UNIQUE REFERENCES dealroom_transactions (id),
        provenance TEXT NOT NULL,
        description TEXT NOT NULL,
        recorded_at TIMESTAMPTZ NOT NULL,
        previous_hash TEXT NULL,
        entry_hash TEXT NOT NULL,
        UNIQUE (idea_id, ledger_index)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_dealroom_messages_connection ON dealroom_messages (connection_id, seq)",
    "CREATE INDEX IF NOT EXISTS idx_dealroom_ledger_connection ON dealroom_ledger_entries (connection_id)",
];

const CONNECTION_COLUMNS: &str = "id, idea_id, founder_id, investor_id, status, deal_status, proposed_amount, note, version, created_at, updated_at";
const IDEA_COLUMNS: &str = "id, founder_id, title, status, investment_received, created_at";
const MESSAGE_COLUMNS: &str =
    "id, connection_id, seq, sender_id, message_type, content, is_read, read_at, created_at";
const TRANSACTION_COLUMNS: &str = "id, connection_id, idea_id, direction, payer_id, payee_id, amount, proof_url, status, initiator_confirmed_at, payee_confirmed_at";
const LEDGER_COLUMNS: &str = "id, idea_id, ledger_index, kind, connection_id, founder_id, investor_id, amount, transaction_id, provenance, description, recorded_at, previous_hash, entry_hash";

/// PostgreSQL store.
///
/// Conditional transitions are `UPDATE ... WHERE <expected state>` inside a
/// database transaction together with their ledger insert and aggregate
/// increment. Row locks are always taken connection first, then idea.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

fn pg_err(context: &'static str) -> impl Fn(sqlx::Error) -> DealError {
    move |e| DealError::Store(format!("postgres {context} failed: {e}"))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == "23505")
        .unwrap_or(false)
}

impl PostgresStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, DealError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(pg_err("connect"))?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), DealError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(pg_err("schema create"))?;
        }
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, DealError> {
        self.pool.begin().await.map_err(pg_err("begin"))
    }

    async fn insert_messages(
        tx: &mut Transaction<'static, Postgres>,
        messages: Vec<NewMessage>,
    ) -> Result<Vec<Message>, DealError> {
        let mut inserted = Vec::with_capacity(messages.len());
        for message in messages {
            let locked = sqlx::query("SELECT id FROM dealroom_connections WHERE id = $1 FOR UPDATE")
                .bind(message.connection_id.as_uuid())
                .fetch_optional(&mut **tx)
                .await
                .map_err(pg_err("lock connection"))?;
            if locked.is_none() {
                return Err(DealError::not_found("connection", message.connection_id));
            }

            let last: i64 = sqlx::query_scalar(
                "SELECT COALESCE(MAX(seq), 0) FROM dealroom_messages WHERE connection_id = $1",
            )
            .bind(message.connection_id.as_uuid())
            .fetch_one(&mut **tx)
            .await
            .map_err(pg_err("message sequence"))?;

            let message = Message {
                id: MessageId::generate(),
                connection_id: message.connection_id,
                seq: decode_u64(last + 1, "seq")?,
                sender_id: message.sender_id,
                message_type: message.content.message_type(),
                content: message.content,
                read: false,
                read_at: None,
                created_at: Utc::now(),
            };
            let content = serde_json::to_value(&message.content)?;

            sqlx::query(
                r#"
                INSERT INTO dealroom_messages (
                    id, connection_id, seq, sender_id, message_type, content, is_read, read_at, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(message.id.as_uuid())
            .bind(message.connection_id.as_uuid())
            .bind(last + 1)
            .bind(message.sender_id.as_str())
            .bind(message.message_type.as_str())
            .bind(content)
            .bind(message.read)
            .bind(message.read_at)
            .bind(message.created_at)
            .execute(&mut **tx)
            .await
            .map_err(pg_err("message insert"))?;

            inserted.push(message);
        }
        Ok(inserted)
    }

    /// Lock the idea, seal the draft onto its chain and apply the aggregate
    /// increment when the entry is an investment.
    async fn insert_ledger_entry(
        tx: &mut Transaction<'static, Postgres>,
        draft: LedgerDraft,
    ) -> Result<(LedgerEntry, Idea), DealError> {
        let idea_row = sqlx::query(&format!(
            "SELECT {IDEA_COLUMNS} FROM dealroom_ideas WHERE id = $1 FOR UPDATE"
        ))
        .bind(draft.idea_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(pg_err("lock idea"))?
        .ok_or_else(|| DealError::not_found("idea", draft.idea_id))?;
        let mut idea = idea_from_row(&idea_row)?;

        let head = sqlx::query(
            "SELECT ledger_index, entry_hash FROM dealroom_ledger_entries WHERE idea_id = $1 ORDER BY ledger_index DESC LIMIT 1",
        )
        .bind(draft.idea_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(pg_err("ledger head"))?;
        let (next_index, previous_hash) = match head {
            Some(row) => {
                let index: i64 = row.try_get("ledger_index").map_err(pg_err("decode ledger_index"))?;
                let hash: String = row.try_get("entry_hash").map_err(pg_err("decode entry_hash"))?;
                (decode_u64(index + 1, "ledger_index")?, Some(hash))
            }
            None => (0, None),
        };

        let credits_idea = draft.credits_idea();
        if credits_idea {
            idea.clone().credit(draft.amount)?;
        }
        let entry = draft.seal(next_index, previous_hash);
        let index: i64 = entry
            .index
            .try_into()
            .map_err(|_| DealError::Store("ledger index exceeds BIGINT range".to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO dealroom_ledger_entries (
                id, idea_id, ledger_index, kind, connection_id, founder_id, investor_id, amount,
                transaction_id, provenance, description, recorded_at, previous_hash, entry_hash
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.idea_id.as_uuid())
        .bind(index)
        .bind(entry.kind.as_str())
        .bind(entry.connection_id.as_uuid())
        .bind(entry.founder_id.as_str())
        .bind(entry.investor_id.as_str())
        .bind(entry.amount.minor())
        .bind(entry.transaction_id.map(|id| id.as_uuid()))
        .bind(entry.provenance.as_str())
        .bind(&entry.description)
        .bind(entry.recorded_at)
        .bind(&entry.previous_hash)
        .bind(&entry.entry_hash)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                DealError::StaleState(format!(
                    "ledger entry for idea '{}' already recorded",
                    entry.idea_id
                ))
            } else {
                DealError::Store(format!("postgres ledger insert failed: {e}"))
            }
        })?;

        if credits_idea {
            let row = sqlx::query(&format!(
                "UPDATE dealroom_ideas SET investment_received = investment_received + $2, status = 'funded' WHERE id = $1 RETURNING {IDEA_COLUMNS}"
            ))
            .bind(entry.idea_id.as_uuid())
            .bind(entry.amount.minor())
            .fetch_one(&mut **tx)
            .await
            .map_err(pg_err("aggregate increment"))?;
            idea = idea_from_row(&row)?;
        }

        Ok((entry, idea))
    }
}

#[async_trait]
impl DealStore for PostgresStore {
    fn backend_label(&self) -> &'static str {
        "postgres"
    }

    async fn insert_idea(&self, idea: &Idea) -> Result<(), DealError> {
        sqlx::query(
            "INSERT INTO dealroom_ideas (id, founder_id, title, status, investment_received, created_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(idea.id.as_uuid())
        .bind(idea.founder_id.as_str())
        .bind(&idea.title)
        .bind(idea.status.as_str())
        .bind(idea.investment_received_minor)
        .bind(idea.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                DealError::InvalidState(format!("idea '{}' already exists", idea.id))
            } else {
                DealError::Store(format!("postgres idea insert failed: {e}"))
            }
        })?;
        Ok(())
    }

    async fn get_idea(&self, id: IdeaId) -> Result<Idea, DealError> {
        let row = sqlx::query(&format!("SELECT {IDEA_COLUMNS} FROM dealroom_ideas WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(pg_err("idea load"))?
            .ok_or_else(|| DealError::not_found("idea", id))?;
        idea_from_row(&row)
    }

    async fn insert_connection(&self, connection: &Connection) -> Result<(), DealError> {
        sqlx::query(&format!(
            "INSERT INTO dealroom_connections ({CONNECTION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(connection.id.as_uuid())
        .bind(connection.idea_id.as_uuid())
        .bind(connection.founder_id.as_str())
        .bind(connection.investor_id.as_str())
        .bind(connection.status.as_str())
        .bind(connection.deal_status.as_str())
        .bind(connection.proposed_amount.map(Amount::minor))
        .bind(&connection.note)
        .bind(encode_version(connection.version)?)
        .bind(connection.created_at)
        .bind(connection.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                DealError::InvalidState(format!(
                    "investor '{}' already has an open connection on idea '{}'",
                    connection.investor_id, connection.idea_id
                ))
            } else {
                DealError::Store(format!("postgres connection insert failed: {e}"))
            }
        })?;
        Ok(())
    }

    async fn get_connection(&self, id: ConnectionId) -> Result<Connection, DealError> {
        let row = sqlx::query(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM dealroom_connections WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(pg_err("connection load"))?
        .ok_or_else(|| DealError::not_found("connection", id))?;
        connection_from_row(&row)
    }

    async fn connections_for_user(&self, user_id: &UserId) -> Result<Vec<Connection>, DealError> {
        let rows = sqlx::query(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM dealroom_connections WHERE founder_id = $1 OR investor_id = $1 ORDER BY created_at ASC"
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(pg_err("connection list"))?;
        rows.iter().map(connection_from_row).collect()
    }

    async fn commit_connection(
        &self,
        change: ConnectionChange,
    ) -> Result<ConnectionCommit, DealError> {
        let mut tx = self.begin().await?;
        let next = &change.next;

        let updated = sqlx::query(&format!(
            r#"
            UPDATE dealroom_connections
            SET status = $2, deal_status = $3, proposed_amount = $4, updated_at = $5,
                version = version + 1
            WHERE id = $1 AND status = $6 AND deal_status = $7
              AND proposed_amount IS NOT DISTINCT FROM $8 AND version = $9
            RETURNING {CONNECTION_COLUMNS}
            "#
        ))
        .bind(next.id.as_uuid())
        .bind(next.status.as_str())
        .bind(next.deal_status.as_str())
        .bind(next.proposed_amount.map(Amount::minor))
        .bind(next.updated_at)
        .bind(change.expected.status.as_str())
        .bind(change.expected.deal_status.as_str())
        .bind(change.expected.proposed_amount.map(Amount::minor))
        .bind(encode_version(change.expected.version)?)
        .fetch_optional(&mut *tx)
        .await
        .map_err(pg_err("connection update"))?;

        let connection = match updated {
            Some(row) => connection_from_row(&row)?,
            None => {
                drop(tx);
                let current = self.get_connection(next.id).await?;
                return Err(DealError::StaleState(format!(
                    "connection '{}' is '{}', expected '{}'",
                    current.id,
                    current.guard(),
                    change.expected
                )));
            }
        };

        let message = match change.message {
            Some(message) => Self::insert_messages(&mut tx, vec![message]).await?.pop(),
            None => None,
        };
        let (entry, idea) = match change.ledger {
            Some(draft) => {
                let (entry, idea) = Self::insert_ledger_entry(&mut tx, draft).await?;
                (Some(entry), Some(idea))
            }
            None => (None, None),
        };

        tx.commit().await.map_err(pg_err("commit"))?;

        Ok(ConnectionCommit {
            connection,
            message,
            entry,
            idea,
        })
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message, DealError> {
        let mut tx = self.begin().await?;
        let inserted = Self::insert_messages(&mut tx, vec![message]).await?;
        tx.commit().await.map_err(pg_err("commit"))?;
        inserted
            .into_iter()
            .next()
            .ok_or_else(|| DealError::Store("message insert returned nothing".to_string()))
    }

    async fn messages(
        &self,
        connection_id: ConnectionId,
        after_seq: Option<u64>,
    ) -> Result<Vec<Message>, DealError> {
        let after: i64 = after_seq
            .unwrap_or(0)
            .try_into()
            .map_err(|_| DealError::InvalidInput("sequence out of range".to_string()))?;
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM dealroom_messages WHERE connection_id = $1 AND seq > $2 ORDER BY seq ASC"
        ))
        .bind(connection_id.as_uuid())
        .bind(after)
        .fetch_all(&self.pool)
        .await
        .map_err(pg_err("message list"))?;
        rows.iter().map(message_from_row).collect()
    }

    async fn mark_read(
        &self,
        connection_id: ConnectionId,
        message_id: MessageId,
        read_at: DateTime<Utc>,
    ) -> Result<Message, DealError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE dealroom_messages
            SET is_read = TRUE, read_at = COALESCE(read_at, $3)
            WHERE id = $1 AND connection_id = $2
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(message_id.as_uuid())
        .bind(connection_id.as_uuid())
        .bind(read_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(pg_err("mark read"))?
        .ok_or_else(|| DealError::not_found("message", message_id))?;
        message_from_row(&row)
    }

    async fn insert_transaction(
        &self,
        transaction: &PaymentTransaction,
        messages: Vec<NewMessage>,
    ) -> Result<Vec<Message>, DealError> {
        let mut tx = self.begin().await?;
        sqlx::query(&format!(
            "INSERT INTO dealroom_transactions ({TRANSACTION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(transaction.id.as_uuid())
        .bind(transaction.connection_id.as_uuid())
        .bind(transaction.idea_id.as_uuid())
        .bind(transaction.direction.as_str())
        .bind(transaction.payer_id.as_str())
        .bind(transaction.payee_id.as_str())
        .bind(transaction.amount.minor())
        .bind(&transaction.proof_url)
        .bind(transaction.status.as_str())
        .bind(transaction.initiator_confirmed_at)
        .bind(transaction.payee_confirmed_at)
        .execute(&mut *tx)
        .await
        .map_err(pg_err("transaction insert"))?;

        let inserted = Self::insert_messages(&mut tx, messages).await?;
        tx.commit().await.map_err(pg_err("commit"))?;
        Ok(inserted)
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<PaymentTransaction, DealError> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM dealroom_transactions WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(pg_err("transaction load"))?
        .ok_or_else(|| DealError::not_found("transaction", id))?;
        transaction_from_row(&row)
    }

    async fn transactions_for_connection(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Vec<PaymentTransaction>, DealError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM dealroom_transactions WHERE connection_id = $1 ORDER BY initiator_confirmed_at ASC"
        ))
        .bind(connection_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(pg_err("transaction list"))?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn complete_transaction(
        &self,
        completion: TransactionCompletion,
    ) -> Result<SettlementCommit, DealError> {
        let mut tx = self.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE dealroom_transactions
            SET status = 'completed', payee_confirmed_at = $2
            WHERE id = $1 AND status = 'initiator_confirmed'
            RETURNING {TRANSACTION_COLUMNS}
            "#
        ))
        .bind(completion.transaction_id.as_uuid())
        .bind(completion.confirmed_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(pg_err("transaction update"))?;

        let transaction = match row {
            Some(row) => transaction_from_row(&row)?,
            None => {
                drop(tx);
                let existing = self.get_transaction(completion.transaction_id).await?;
                return Err(DealError::AlreadyCompleted(existing.id.to_string()));
            }
        };

        let messages = Self::insert_messages(&mut tx, completion.messages).await?;
        let credits_idea = completion.ledger.credits_idea();
        let (entry, idea) = Self::insert_ledger_entry(&mut tx, completion.ledger).await?;

        tx.commit().await.map_err(pg_err("commit"))?;

        Ok(SettlementCommit {
            transaction,
            entry,
            messages,
            idea: credits_idea.then_some(idea),
        })
    }

    async fn ledger_entries(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>, DealError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {LEDGER_COLUMNS}
            FROM dealroom_ledger_entries
            WHERE ($1::UUID IS NULL OR idea_id = $1)
              AND ($2::UUID IS NULL OR connection_id = $2)
              AND ($3::TEXT IS NULL OR kind = $3)
            ORDER BY recorded_at ASC, ledger_index ASC
            "#
        ))
        .bind(query.idea_id.map(|id| id.as_uuid()))
        .bind(query.connection_id.map(|id| id.as_uuid()))
        .bind(query.kind.map(LedgerEntryKind::as_str))
        .fetch_all(&self.pool)
        .await
        .map_err(pg_err("ledger load"))?;
        rows.iter().map(ledger_entry_from_row).collect()
    }
}

fn decode_u64(value: i64, column: &str) -> Result<u64, DealError> {
    value
        .try_into()
        .map_err(|_| DealError::Store(format!("negative {column} in storage")))
}

fn encode_version(version: u64) -> Result<i64, DealError> {
    version
        .try_into()
        .map_err(|_| DealError::Store("connection version exceeds BIGINT range".to_string()))
}

fn decode_amount(value: i64) -> Result<Amount, DealError> {
    Amount::new(value).map_err(|e| DealError::Store(format!("stored amount invalid: {e}")))
}

fn get<'r, T>(row: &'r PgRow, column: &'static str) -> Result<T, DealError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| DealError::Store(format!("postgres decode {column} failed: {e}")))
}

fn idea_from_row(row: &PgRow) -> Result<Idea, DealError> {
    Ok(Idea {
        id: IdeaId(get::<Uuid>(row, "id")?),
        founder_id: UserId::new(get::<String>(row, "founder_id")?),
        title: get(row, "title")?,
        status: IdeaStatus::parse(&get::<String>(row, "status")?)?,
        investment_received_minor: get(row, "investment_received")?,
        created_at: get(row, "created_at")?,
    })
}

fn connection_from_row(row: &PgRow) -> Result<Connection, DealError> {
    Ok(Connection {
        id: ConnectionId(get::<Uuid>(row, "id")?),
        idea_id: IdeaId(get::<Uuid>(row, "idea_id")?),
        founder_id: UserId::new(get::<String>(row, "founder_id")?),
        investor_id: UserId::new(get::<String>(row, "investor_id")?),
        status: ConnectionStatus::parse(&get::<String>(row, "status")?)?,
        deal_status: DealStatus::parse(&get::<String>(row, "deal_status")?)?,
        proposed_amount: get::<Option<i64>>(row, "proposed_amount")?
            .map(decode_amount)
            .transpose()?,
        note: get(row, "note")?,
        version: decode_u64(get(row, "version")?, "version")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn message_from_row(row: &PgRow) -> Result<Message, DealError> {
    let content: MessageContent = serde_json::from_value(get(row, "content")?)?;
    Ok(Message {
        id: MessageId(get::<Uuid>(row, "id")?),
        connection_id: ConnectionId(get::<Uuid>(row, "connection_id")?),
        seq: decode_u64(get(row, "seq")?, "seq")?,
        sender_id: UserId::new(get::<String>(row, "sender_id")?),
        message_type: content.message_type(),
        content,
        read: get(row, "is_read")?,
        read_at: get(row, "read_at")?,
        created_at: get(row, "created_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<PaymentTransaction, DealError> {
    Ok(PaymentTransaction {
        id: TransactionId(get::<Uuid>(row, "id")?),
        connection_id: ConnectionId(get::<Uuid>(row, "connection_id")?),
        idea_id: IdeaId(get::<Uuid>(row, "idea_id")?),
        direction: PaymentDirection::parse(&get::<String>(row, "direction")?)
            .map_err(|e| DealError::Store(e.to_string()))?,
        payer_id: UserId::new(get::<String>(row, "payer_id")?),
        payee_id: UserId::new(get::<String>(row, "payee_id")?),
        amount: decode_amount(get(row, "amount")?)?,
        proof_url: get(row, "proof_url")?,
        status: TransactionStatus::parse(&get::<String>(row, "status")?)?,
        initiator_confirmed_at: get(row, "initiator_confirmed_at")?,
        payee_confirmed_at: get(row, "payee_confirmed_at")?,
    })
}

fn ledger_entry_from_row(row: &PgRow) -> Result<LedgerEntry, DealError> {
    Ok(LedgerEntry {
        id: LedgerEntryId(get::<Uuid>(row, "id")?),
        index: decode_u64(get(row, "ledger_index")?, "ledger_index")?,
        kind: LedgerEntryKind::parse(&get::<String>(row, "kind")?)?,
        idea_id: IdeaId(get::<Uuid>(row, "idea_id")?),
        connection_id: ConnectionId(get::<Uuid>(row, "connection_id")?),
        founder_id: UserId::new(get::<String>(row, "founder_id")?),
        investor_id: UserId::new(get::<String>(row, "investor_id")?),
        amount: decode_amount(get(row, "amount")?)?,
        transaction_id: get::<Option<Uuid>>(row, "transaction_id")?.map(TransactionId),
        provenance: Provenance::parse(&get::<String>(row, "provenance")?)?,
        description: get(row, "description")?,
        recorded_at: get(row, "recorded_at")?,
        previous_hash: get(row, "previous_hash")?,
        entry_hash: get(row, "entry_hash")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_statements_are_idempotent() {
        assert!(SCHEMA
            .iter()
            .all(|statement| statement.contains("IF NOT EXISTS")));
    }

    #[test]
    fn column_lists_match_insert_arity() {
        assert_eq!(CONNECTION_COLUMNS.split(',').count(), 11);
        assert_eq!(TRANSACTION_COLUMNS.split(',').count(), 11);
        assert_eq!(LEDGER_COLUMNS.split(',').count(), 14);
    }
}
