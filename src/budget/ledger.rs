//! Append-only cost ledger.
//!
//! The ledger is the only durable budget state. Spend totals are never stored;
//! they are rebuilt by replaying every record when a manager starts.
//!
//! Backends:
//! - [`JsonlLedger`]: one JSON record per line, fsync'd on every append
//! - [`SqliteLedger`]: one row per record
//! - [`MemoryLedger`]: non-durable, for tests and dry runs

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by ledger backends.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Ledger database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// One usage event. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
    pub operation: String,
}

impl CostRecord {
    pub fn new(
        agent_id: impl Into<String>,
        model: impl Into<String>,
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            agent_id: agent_id.into(),
            model: model.into(),
            input_tokens,
            output_tokens,
            total_tokens: input_tokens.saturating_add(output_tokens),
            cost_usd,
            operation: operation.into(),
        }
    }
}

/// Durable store behind the budget manager.
///
/// # Invariants
/// - `append` returns only after the record is durable
/// - `replay` yields records in append order and never fails on a torn tail
pub trait Ledger: Send {
    fn append(&mut self, record: &CostRecord) -> Result<(), LedgerError>;

    fn replay(&self) -> Result<Vec<CostRecord>, LedgerError>;

    /// Drop all history. Only used by an explicit reset.
    fn clear(&mut self) -> Result<(), LedgerError>;
}

/// JSON-lines file ledger.
pub struct JsonlLedger {
    path: PathBuf,
    file: File,
}

impl JsonlLedger {
    /// Open (or create) the ledger file at `path`.
    ///
    /// A torn final line left by a crash is terminated so the next append
    /// starts on a fresh line.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let mut ledger = Self { path, file };
        ledger.terminate_partial_line()?;
        Ok(ledger)
    }

    /// Ensure the file ends on a line boundary.
    fn terminate_partial_line(&mut self) -> Result<(), LedgerError> {
        let len = self.file.metadata()?.len();
        if len == 0 {
            return Ok(());
        }

        let mut last = [0u8; 1];
        self.file.seek(SeekFrom::Start(len - 1))?;
        self.file.read_exact(&mut last)?;
        if last[0] != b'\n' {
            tracing::warn!(path = %self.path.display(), "Cost ledger ends with a partial record, terminating it");
            self.file.write_all(b"\n")?;
            self.file.sync_data()?;
        }
        Ok(())
    }
}

impl Ledger for JsonlLedger {
    /// A failed write is rolled back to the previous length so the next
    /// record starts on its own line.
    fn append(&mut self, record: &CostRecord) -> Result<(), LedgerError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        self.terminate_partial_line()?;
        let start = self.file.metadata()?.len();
        let written = self
            .file
            .write_all(&line)
            .and_then(|()| self.file.flush())
            .and_then(|()| self.file.sync_data());

        if let Err(e) = written {
            if let Err(rollback) = self.file.set_len(start) {
                tracing::error!(
                    path = %self.path.display(),
                    "Failed to roll back partial cost record: {}",
                    rollback
                );
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn replay(&self) -> Result<Vec<CostRecord>, LedgerError> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();

        // Split on raw bytes: a torn tail may end inside a multi-byte character.
        for (index, line) in reader.split(b'\n').enumerate() {
            let line = line?;
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<CostRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        line = index + 1,
                        "Skipping unreadable cost record: {}",
                        e
                    );
                }
            }
        }

        Ok(records)
    }

    fn clear(&mut self) -> Result<(), LedgerError> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        Ok(())
    }
}

/// SQLite-backed ledger.
pub struct SqliteLedger {
    conn: Connection,
}

impl SqliteLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cost_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                model TEXT NOT NULL,
                input_tokens INTEGER NOT NULL,
                output_tokens INTEGER NOT NULL,
                total_tokens INTEGER NOT NULL,
                cost_usd REAL NOT NULL,
                operation TEXT NOT NULL
            );",
        )?;
        Ok(Self { conn })
    }
}

impl Ledger for SqliteLedger {
    fn append(&mut self, record: &CostRecord) -> Result<(), LedgerError> {
        self.conn.execute(
            "INSERT INTO cost_records
                (timestamp, agent_id, model, input_tokens, output_tokens, total_tokens, cost_usd, operation)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.timestamp.to_rfc3339(),
                record.agent_id,
                record.model,
                record.input_tokens as i64,
                record.output_tokens as i64,
                record.total_tokens as i64,
                record.cost_usd,
                record.operation,
            ],
        )?;
        Ok(())
    }

    fn replay(&self) -> Result<Vec<CostRecord>, LedgerError> {
        let mut stmt = self.conn.prepare(
            "SELECT timestamp, agent_id, model, input_tokens, output_tokens, total_tokens, cost_usd, operation
             FROM cost_records ORDER BY id ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            let timestamp: String = row.get(0)?;
            Ok((
                timestamp,
                CostRecord {
                    timestamp: Utc::now(),
                    agent_id: row.get(1)?,
                    model: row.get(2)?,
                    input_tokens: row.get::<_, i64>(3)? as u64,
                    output_tokens: row.get::<_, i64>(4)? as u64,
                    total_tokens: row.get::<_, i64>(5)? as u64,
                    cost_usd: row.get(6)?,
                    operation: row.get(7)?,
                },
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (timestamp, mut record) = row?;
            match DateTime::parse_from_rfc3339(&timestamp) {
                Ok(ts) => record.timestamp = ts.with_timezone(&Utc),
                Err(e) => {
                    tracing::warn!("Cost record has unreadable timestamp '{}': {}", timestamp, e);
                }
            }
            records.push(record);
        }
        Ok(records)
    }

    fn clear(&mut self) -> Result<(), LedgerError> {
        self.conn.execute("DELETE FROM cost_records", [])?;
        Ok(())
    }
}

/// In-memory ledger. Not durable.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: Vec<CostRecord>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Ledger for MemoryLedger {
    fn append(&mut self, record: &CostRecord) -> Result<(), LedgerError> {
        self.records.push(record.clone());
        Ok(())
    }

    fn replay(&self) -> Result<Vec<CostRecord>, LedgerError> {
        Ok(self.records.clone())
    }

    fn clear(&mut self) -> Result<(), LedgerError> {
        self.records.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(agent: &str, cost: f64) -> CostRecord {
        CostRecord::new(agent, "openai/gpt-4o", 1200, 800, cost, "track_selection")
    }

    #[test]
    fn test_record_total_tokens() {
        let r = record("morning", 0.1);
        assert_eq!(r.total_tokens, 2000);
    }

    #[test]
    fn test_jsonl_append_and_replay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("costs.jsonl");

        let mut ledger = JsonlLedger::open(&path).unwrap();
        ledger.append(&record("morning", 0.10)).unwrap();
        ledger.append(&record("evening", 0.25)).unwrap();

        let records = ledger.replay().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].agent_id, "morning");
        assert_eq!(records[1].cost_usd, 0.25);

        // One JSON object per line with the documented field names.
        let content = std::fs::read_to_string(&path).unwrap();
        let first: serde_json::Value =
            serde_json::from_str(content.lines().next().unwrap()).unwrap();
        for field in [
            "timestamp",
            "agent_id",
            "model",
            "input_tokens",
            "output_tokens",
            "total_tokens",
            "cost_usd",
            "operation",
        ] {
            assert!(first.get(field).is_some(), "missing {field}");
        }
    }

    #[test]
    fn test_jsonl_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("costs.jsonl");

        {
            let mut ledger = JsonlLedger::open(&path).unwrap();
            ledger.append(&record("a", 0.5)).unwrap();
        }

        let ledger = JsonlLedger::open(&path).unwrap();
        assert_eq!(ledger.replay().unwrap().len(), 1);
    }

    #[test]
    fn test_jsonl_skips_torn_final_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("costs.jsonl");

        let good = serde_json::to_string(&record("a", 0.5)).unwrap();
        std::fs::write(&path, format!("{}\n{{\"timestamp\":\"2026-01-", good)).unwrap();

        let mut ledger = JsonlLedger::open(&path).unwrap();
        assert_eq!(ledger.replay().unwrap().len(), 1);

        // The next append lands on its own line and stays readable.
        ledger.append(&record("b", 0.7)).unwrap();
        let records = ledger.replay().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].agent_id, "b");
    }

    #[test]
    fn test_jsonl_skips_torn_multibyte_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("costs.jsonl");

        let good = serde_json::to_string(&record("matin", 0.5)).unwrap();
        let torn = serde_json::to_string(&record("café", 0.7)).unwrap();
        let cut = torn.find('é').unwrap() + 1;
        let mut bytes = format!("{}\n", good).into_bytes();
        bytes.extend_from_slice(&torn.as_bytes()[..cut]);
        std::fs::write(&path, bytes).unwrap();

        let mut ledger = JsonlLedger::open(&path).unwrap();
        let records = ledger.replay().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].agent_id, "matin");

        ledger.append(&record("café", 0.7)).unwrap();
        let records = ledger.replay().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].agent_id, "café");
    }

    #[test]
    fn test_jsonl_append_after_foreign_partial_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("costs.jsonl");

        let mut ledger = JsonlLedger::open(&path).unwrap();
        ledger.append(&record("a", 0.5)).unwrap();

        // a write that died halfway after the ledger was opened
        let mut other = OpenOptions::new().append(true).open(&path).unwrap();
        other.write_all(b"{\"timestamp\":\"2026-").unwrap();
        drop(other);

        ledger.append(&record("b", 0.25)).unwrap();
        let records = ledger.replay().unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.agent_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_jsonl_clear() {
        let dir = TempDir::new().unwrap();
        let mut ledger = JsonlLedger::open(dir.path().join("costs.jsonl")).unwrap();
        ledger.append(&record("a", 0.5)).unwrap();
        ledger.clear().unwrap();
        assert!(ledger.replay().unwrap().is_empty());
        ledger.append(&record("b", 0.5)).unwrap();
        assert_eq!(ledger.replay().unwrap().len(), 1);
    }

    #[test]
    fn test_sqlite_append_replay_clear() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();
        let first = record("a", 0.5);
        ledger.append(&first).unwrap();
        ledger.append(&record("b", 1.5)).unwrap();

        let records = ledger.replay().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].agent_id, "a");
        assert_eq!(records[0].timestamp.timestamp(), first.timestamp.timestamp());
        assert_eq!(records[1].cost_usd, 1.5);

        ledger.clear().unwrap();
        assert!(ledger.replay().unwrap().is_empty());
    }

    #[test]
    fn test_sqlite_persists_across_connections() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("costs.db");
        {
            let mut ledger = SqliteLedger::open(&path).unwrap();
            ledger.append(&record("a", 0.5)).unwrap();
        }
        let ledger = SqliteLedger::open(&path).unwrap();
        assert_eq!(ledger.replay().unwrap().len(), 1);
    }
}
