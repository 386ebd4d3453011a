use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(String),
}

/// Outcome recorded for one submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionStatus {
    /// Confirmed by the endpoint.
    Ok,
    /// Queued in the pending directory for a later attempt.
    TryLater,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Ok => "ok",
            SubmissionStatus::TryLater => "try later",
        }
    }

    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "ok" => Some(SubmissionStatus::Ok),
            "try later" => Some(SubmissionStatus::TryLater),
            _ => None,
        }
    }
}

/// A submission attempt to append to the ledger.
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub file_name: String,
    /// Acting user, resolved from the environment.
    pub user: String,
    /// Originating subsystem.
    pub origin: String,
    pub status: SubmissionStatus,
}

/// One persisted ledger row.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionRecord {
    pub id: i64,
    pub file_name: String,
    pub user: String,
    pub origin: String,
    pub status: SubmissionStatus,
    pub submitted_at: DateTime<Utc>,
}

/// Append-only record of submission attempts and their outcomes.
pub trait SubmissionLedger: Send + Sync {
    /// Append one record, returning the assigned ID.
    fn insert(&self, submission: &NewSubmission) -> Result<i64, LedgerError>;

    /// Most recent records, newest first.
    fn recent(&self, limit: i64) -> Result<Vec<SubmissionRecord>, LedgerError>;

    /// Records still awaiting a confirmed delivery: `try later` rows whose
    /// file name has no later `ok` row.
    fn pending(&self) -> Result<Vec<SubmissionRecord>, LedgerError>;
}
