use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{LedgerError, NewSubmission, SubmissionLedger, SubmissionRecord, SubmissionStatus};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS submissions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_name TEXT NOT NULL,
    user TEXT NOT NULL,
    origin TEXT NOT NULL,
    status TEXT NOT NULL,
    submitted_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_submissions_file_name ON submissions(file_name);
CREATE INDEX IF NOT EXISTS idx_submissions_status ON submissions(status);
"#;

/// SQLite-backed submission ledger
pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    /// Open (or create) the ledger database file.
    pub fn new(path: &Path) -> Result<Self, LedgerError> {
        let conn = Connection::open(path).map_err(|e| LedgerError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| LedgerError::Database(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory ledger (useful for testing)
    pub fn in_memory() -> Result<Self, LedgerError> {
        let conn =
            Connection::open_in_memory().map_err(|e| LedgerError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| LedgerError::Database(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<SubmissionRecord> {
        let status_raw: String = row.get(4)?;
        let submitted_raw: String = row.get(5)?;
        Ok(SubmissionRecord {
            id: row.get(0)?,
            file_name: row.get(1)?,
            user: row.get(2)?,
            origin: row.get(3)?,
            status: SubmissionStatus::from_str(&status_raw).unwrap_or(SubmissionStatus::TryLater),
            submitted_at: DateTime::parse_from_rfc3339(&submitted_raw)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

impl SubmissionLedger for SqliteLedger {
    fn insert(&self, submission: &NewSubmission) -> Result<i64, LedgerError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO submissions (file_name, user, origin, status, submitted_at) VALUES (?, ?, ?, ?, ?)",
            params![
                submission.file_name,
                submission.user,
                submission.origin,
                submission.status.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| LedgerError::Database(e.to_string()))?;
        Ok(conn.last_insert_rowid())
    }

    fn recent(&self, limit: i64) -> Result<Vec<SubmissionRecord>, LedgerError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, file_name, user, origin, status, submitted_at FROM submissions ORDER BY id DESC LIMIT ?",
            )
            .map_err(|e| LedgerError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![limit], Self::row_to_record)
            .map_err(|e| LedgerError::Database(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| LedgerError::Database(e.to_string()))
    }

    fn pending(&self) -> Result<Vec<SubmissionRecord>, LedgerError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, file_name, user, origin, status, submitted_at FROM submissions s
                 WHERE status = 'try later'
                   AND NOT EXISTS (
                       SELECT 1 FROM submissions later
                       WHERE later.file_name = s.file_name
                         AND later.status = 'ok'
                         AND later.id > s.id
                   )
                 ORDER BY id",
            )
            .map_err(|e| LedgerError::Database(e.to_string()))?;
        let rows = stmt
            .query_map([], Self::row_to_record)
            .map_err(|e| LedgerError::Database(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| LedgerError::Database(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(name: &str, status: SubmissionStatus) -> NewSubmission {
        NewSubmission {
            file_name: name.to_string(),
            user: "oper".to_string(),
            origin: "vget".to_string(),
            status,
        }
    }

    #[test]
    fn test_insert_and_recent() {
        let ledger = SqliteLedger::in_memory().unwrap();
        ledger.insert(&submission("a.snx.gz", SubmissionStatus::Ok)).unwrap();
        ledger
            .insert(&submission("b.eopi.gz", SubmissionStatus::TryLater))
            .unwrap();

        let recent = ledger.recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].file_name, "b.eopi.gz");
        assert_eq!(recent[0].status, SubmissionStatus::TryLater);
        assert_eq!(recent[1].file_name, "a.snx.gz");
    }

    #[test]
    fn test_pending_excludes_later_confirmations() {
        let ledger = SqliteLedger::in_memory().unwrap();
        ledger
            .insert(&submission("a.snx.gz", SubmissionStatus::TryLater))
            .unwrap();
        ledger
            .insert(&submission("b.eopi.gz", SubmissionStatus::TryLater))
            .unwrap();
        // A later confirmed attempt for a.snx.gz resolves its pending row.
        ledger.insert(&submission("a.snx.gz", SubmissionStatus::Ok)).unwrap();

        let pending = ledger.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].file_name, "b.eopi.gz");
    }

    #[test]
    fn test_file_backed_ledger_persists() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("ledger.db");
        {
            let ledger = SqliteLedger::new(&path).unwrap();
            ledger.insert(&submission("a.snx.gz", SubmissionStatus::Ok)).unwrap();
        }
        let ledger = SqliteLedger::new(&path).unwrap();
        assert_eq!(ledger.recent(10).unwrap().len(), 1);
    }
}
