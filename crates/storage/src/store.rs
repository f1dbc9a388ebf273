//! SQLite store implementation.

use crate::{
    Conversation, ConversationSummary, Error, GroupBy, NewConversation, Result, UsageFilter,
    UsageRecord, UsageSummary,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Data-access contract for the usage ledger and conversation table.
///
/// Implementations must be safe to call from concurrent generations: each
/// usage insert is atomic and conversation upserts are last-write-wins.
pub trait Recorder: Send + Sync {
    /// Idempotent schema setup.
    fn initialize(&self) -> Result<()>;

    /// Append one row to the usage ledger.
    fn log_usage(&self, record: &UsageRecord) -> Result<()>;

    /// Raw usage rows, newest first.
    fn usage_records(&self, filter: &UsageFilter) -> Result<Vec<UsageRecord>>;

    /// Per-group totals, sorted by request count descending.
    fn aggregated_stats(&self, group_by: GroupBy) -> Result<Vec<UsageSummary>>;

    /// Sum of `cost` across the whole ledger.
    fn total_cost(&self) -> Result<f64>;

    /// Insert or overwrite a conversation keyed by id. `created_at` survives overwrites.
    fn save_conversation(&self, conversation: &NewConversation) -> Result<()>;

    /// Conversations ordered by `updated_at` descending.
    fn list_conversations(&self, limit: u32, offset: u32) -> Result<Vec<ConversationSummary>>;

    fn get_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    /// Returns whether a row was removed.
    fn delete_conversation(&self, id: &str) -> Result<bool>;
}

/// SQLite-backed recorder.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::Lock)
    }
}

// Fixed-width nanosecond precision keeps TEXT ordering equal to time ordering.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    raw.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_json<T: serde::de::DeserializeOwned>(idx: usize, raw: String) -> rusqlite::Result<T> {
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn encode_metadata(metadata: Option<&serde_json::Value>) -> Result<Option<String>> {
    Ok(metadata.map(serde_json::to_string).transpose()?)
}

impl Recorder for Store {
    fn initialize(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS usage_stats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                model TEXT NOT NULL,
                provider TEXT NOT NULL,
                input_tokens INTEGER NOT NULL,
                output_tokens INTEGER NOT NULL,
                total_tokens INTEGER NOT NULL,
                cost REAL NOT NULL,
                latency_ms REAL NOT NULL,
                timestamp TEXT NOT NULL,
                metadata TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_usage_timestamp
                ON usage_stats(timestamp);
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                model TEXT NOT NULL,
                provider TEXT NOT NULL,
                messages TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                metadata TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_conversations_updated
                ON conversations(updated_at);
            "#,
        )?;
        Ok(())
    }

    fn log_usage(&self, record: &UsageRecord) -> Result<()> {
        let metadata = encode_metadata(record.metadata.as_ref())?;
        self.conn()?.execute(
            "INSERT INTO usage_stats
                (model, provider, input_tokens, output_tokens, total_tokens, cost, latency_ms, timestamp, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.model,
                record.provider,
                record.input_tokens,
                record.output_tokens,
                record.total_tokens,
                record.cost,
                record.latency_ms,
                timestamp(record.timestamp),
                metadata,
            ],
        )?;
        Ok(())
    }

    fn usage_records(&self, filter: &UsageFilter) -> Result<Vec<UsageRecord>> {
        let mut sql = String::from(
            "SELECT model, provider, input_tokens, output_tokens, total_tokens, cost, latency_ms, timestamp, metadata
             FROM usage_stats WHERE 1=1",
        );
        let mut args: Vec<String> = Vec::new();
        if let Some(model) = &filter.model {
            sql.push_str(" AND model = ?");
            args.push(model.clone());
        }
        if let Some(provider) = &filter.provider {
            sql.push_str(" AND provider = ?");
            args.push(provider.clone());
        }
        if let Some(since) = filter.since {
            sql.push_str(" AND timestamp >= ?");
            args.push(timestamp(since));
        }
        if let Some(until) = filter.until {
            sql.push_str(" AND timestamp <= ?");
            args.push(timestamp(until));
        }
        sql.push_str(" ORDER BY timestamp DESC, id DESC");

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                let metadata: Option<String> = row.get(8)?;
                Ok(UsageRecord {
                    model: row.get(0)?,
                    provider: row.get(1)?,
                    input_tokens: row.get(2)?,
                    output_tokens: row.get(3)?,
                    total_tokens: row.get(4)?,
                    cost: row.get(5)?,
                    latency_ms: row.get(6)?,
                    timestamp: parse_timestamp(7, row.get(7)?)?,
                    metadata: metadata.map(|m| parse_json(8, m)).transpose()?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn aggregated_stats(&self, group_by: GroupBy) -> Result<Vec<UsageSummary>> {
        let column = group_by.column();
        let sql = format!(
            "SELECT
                {column} AS group_key,
                COUNT(*) AS total_requests,
                SUM(input_tokens) AS total_input_tokens,
                SUM(output_tokens) AS total_output_tokens,
                SUM(total_tokens) AS total_tokens,
                TOTAL(cost) AS total_cost,
                AVG(latency_ms) AS avg_latency_ms,
                MAX(timestamp) AS last_used
             FROM usage_stats
             GROUP BY {column}
             ORDER BY total_requests DESC, group_key ASC"
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = serde_rusqlite::from_rows::<UsageSummary>(stmt.query([])?);
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn total_cost(&self) -> Result<f64> {
        let total = self
            .conn()?
            .query_row("SELECT TOTAL(cost) FROM usage_stats", [], |row| row.get(0))?;
        Ok(total)
    }

    fn save_conversation(&self, conversation: &NewConversation) -> Result<()> {
        let now = timestamp(Utc::now());
        let messages = serde_json::to_string(&conversation.messages)?;
        let metadata = encode_metadata(conversation.metadata.as_ref())?;
        self.conn()?.execute(
            "INSERT INTO conversations
                (id, title, model, provider, messages, created_at, updated_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                model = excluded.model,
                provider = excluded.provider,
                messages = excluded.messages,
                updated_at = excluded.updated_at,
                metadata = excluded.metadata",
            params![
                conversation.id,
                conversation.title,
                conversation.model,
                conversation.provider,
                messages,
                now,
                metadata,
            ],
        )?;
        Ok(())
    }

    fn list_conversations(&self, limit: u32, offset: u32) -> Result<Vec<ConversationSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, model, provider, created_at, updated_at
             FROM conversations
             ORDER BY updated_at DESC, rowid DESC
             LIMIT ?1 OFFSET ?2",
        )?;
        let rows = serde_rusqlite::from_rows::<ConversationSummary>(stmt.query(params![limit, offset])?);
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let conversation = self
            .conn()?
            .query_row(
                "SELECT id, title, model, provider, messages, created_at, updated_at, metadata
                 FROM conversations WHERE id = ?1",
                [id],
                |row| {
                    let metadata: Option<String> = row.get(7)?;
                    Ok(Conversation {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        model: row.get(2)?,
                        provider: row.get(3)?,
                        messages: parse_json(4, row.get(4)?)?,
                        created_at: parse_timestamp(5, row.get(5)?)?,
                        updated_at: parse_timestamp(6, row.get(6)?)?,
                        metadata: metadata.map(|m| parse_json(7, m)).transpose()?,
                    })
                },
            )
            .optional()?;
        Ok(conversation)
    }

    fn delete_conversation(&self, id: &str) -> Result<bool> {
        let removed = self
            .conn()?
            .execute("DELETE FROM conversations WHERE id = ?1", [id])?;
        Ok(removed > 0)
    }
}
