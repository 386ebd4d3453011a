use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{ConfigError, DeliveryConfig};
use crate::endpoint::{build_endpoint, ArchiveEndpoint};
use crate::metrics;

use super::{LedgerError, NewSubmission, SubmissionLedger, SubmissionStatus};

/// Error type for delivery operations.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("could not queue {path} as pending: {source}")]
    Queue {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not read pending directory {path}: {source}")]
    PendingDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Outcome of one submission batch. Replaces module-global "last submission"
/// state: callers thread this value instead.
#[derive(Debug, Clone, Default)]
pub struct DeliveryReceipt {
    /// Basenames the endpoint confirmed.
    pub confirmed: Vec<String>,
    /// Basenames copied into the pending directory for a later attempt.
    pub pending: Vec<String>,
}

/// Submits result files to the primary data center, queueing anything not
/// confirmed uploaded as a pending delivery with a `try later` ledger entry.
pub struct DeliveryEngine {
    endpoints: HashMap<String, Arc<dyn ArchiveEndpoint>>,
    primary: String,
    pending_dir: PathBuf,
    ledger: Arc<dyn SubmissionLedger>,
    origin: String,
}

impl DeliveryEngine {
    /// Build the engine and its endpoints from configuration.
    pub fn new(
        config: &DeliveryConfig,
        ledger: Arc<dyn SubmissionLedger>,
    ) -> Result<Self, ConfigError> {
        let mut endpoints = HashMap::new();
        for (code, endpoint_config) in &config.endpoints {
            endpoints.insert(code.clone(), build_endpoint(code, endpoint_config)?);
        }
        Ok(Self::with_endpoints(
            endpoints,
            &config.primary,
            &config.pending_dir,
            ledger,
        ))
    }

    /// Assemble the engine from already-built endpoints. Used by tests.
    pub fn with_endpoints(
        endpoints: HashMap<String, Arc<dyn ArchiveEndpoint>>,
        primary: &str,
        pending_dir: &Path,
        ledger: Arc<dyn SubmissionLedger>,
    ) -> Self {
        Self {
            endpoints,
            primary: primary.to_string(),
            pending_dir: pending_dir.to_path_buf(),
            ledger,
            origin: "vget".to_string(),
        }
    }

    /// Acting user for ledger records, honoring sudo.
    pub fn acting_user() -> String {
        std::env::var("SUDO_USER")
            .or_else(|_| std::env::var("USER"))
            .unwrap_or_else(|_| "unknown".to_string())
    }

    /// Submit files to the primary endpoint. Every file ends in exactly one
    /// of {confirmed, pending}; re-submitting unresolved files later simply
    /// appends new ledger entries.
    pub async fn submit(&self, files: &[PathBuf]) -> Result<DeliveryReceipt, DeliveryError> {
        let user = Self::acting_user();

        let uploaded = match self.endpoints.get(&self.primary) {
            Some(endpoint) => {
                if !endpoint.is_connected() {
                    if let Err(e) = endpoint.connect().await {
                        warn!(center = %self.primary, error = %e, "primary data center unreachable");
                    }
                }
                if endpoint.is_connected() {
                    match endpoint.upload(files).await {
                        Ok(names) => names,
                        Err(e) => {
                            warn!(center = %self.primary, error = %e, "upload failed");
                            Vec::new()
                        }
                    }
                } else {
                    Vec::new()
                }
            }
            None => {
                warn!(
                    center = %self.primary,
                    "primary data center not configured, queueing everything"
                );
                Vec::new()
            }
        };

        let mut receipt = DeliveryReceipt::default();
        for file in files {
            let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if uploaded.iter().any(|u| u == name) {
                self.ledger.insert(&NewSubmission {
                    file_name: name.to_string(),
                    user: user.clone(),
                    origin: self.origin.clone(),
                    status: SubmissionStatus::Ok,
                })?;
                metrics::SUBMISSIONS.with_label_values(&["ok"]).inc();
                receipt.confirmed.push(name.to_string());
            } else {
                self.queue_pending(file)?;
                self.ledger.insert(&NewSubmission {
                    file_name: name.to_string(),
                    user: user.clone(),
                    origin: self.origin.clone(),
                    status: SubmissionStatus::TryLater,
                })?;
                metrics::SUBMISSIONS.with_label_values(&["try_later"]).inc();
                info!(file = name, "queued for later upload");
                receipt.pending.push(name.to_string());
            }
        }
        Ok(receipt)
    }

    /// Re-drive every file sitting in the pending directory through `submit`,
    /// removing the queued copy of anything that gets confirmed.
    pub async fn resubmit_pending(&self) -> Result<DeliveryReceipt, DeliveryError> {
        let mut files = Vec::new();
        if self.pending_dir.is_dir() {
            let entries =
                std::fs::read_dir(&self.pending_dir).map_err(|source| DeliveryError::PendingDir {
                    path: self.pending_dir.clone(),
                    source,
                })?;
            for entry in entries {
                let entry = entry.map_err(|source| DeliveryError::PendingDir {
                    path: self.pending_dir.clone(),
                    source,
                })?;
                if entry.path().is_file() {
                    files.push(entry.path());
                }
            }
        }
        if files.is_empty() {
            return Ok(DeliveryReceipt::default());
        }
        files.sort();

        let receipt = self.submit(&files).await?;
        for name in &receipt.confirmed {
            let queued = self.pending_dir.join(name);
            if let Err(e) = std::fs::remove_file(&queued) {
                warn!(file = %queued.display(), error = %e, "could not remove confirmed pending file");
            }
        }
        Ok(receipt)
    }

    fn queue_pending(&self, file: &Path) -> Result<(), DeliveryError> {
        let queue_error = |source| DeliveryError::Queue {
            path: file.to_path_buf(),
            source,
        };
        std::fs::create_dir_all(&self.pending_dir).map_err(queue_error)?;
        // Files already sitting in the pending directory stay where they are.
        if file.parent() == Some(self.pending_dir.as_path()) {
            return Ok(());
        }
        let Some(name) = file.file_name() else {
            return Ok(());
        };
        std::fs::copy(file, self.pending_dir.join(name)).map_err(queue_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::SqliteLedger;
    use crate::testing::MockEndpoint;
    use tempfile::TempDir;

    fn engine_with(
        tmp: &TempDir,
        endpoint: Option<Arc<MockEndpoint>>,
        primary: &str,
    ) -> (DeliveryEngine, Arc<SqliteLedger>) {
        let ledger = Arc::new(SqliteLedger::in_memory().unwrap());
        let mut endpoints: HashMap<String, Arc<dyn ArchiveEndpoint>> = HashMap::new();
        if let Some(ep) = endpoint {
            endpoints.insert("cddis".to_string(), ep);
        }
        let engine = DeliveryEngine::with_endpoints(
            endpoints,
            primary,
            &tmp.path().join("pending"),
            Arc::clone(&ledger) as Arc<dyn SubmissionLedger>,
        );
        (engine, ledger)
    }

    fn write_file(tmp: &TempDir, name: &str) -> PathBuf {
        let path = tmp.path().join(name);
        std::fs::write(&path, name.as_bytes()).unwrap();
        path
    }

    #[tokio::test]
    async fn test_unknown_primary_queues_everything() {
        let tmp = TempDir::new().unwrap();
        let (engine, ledger) = engine_with(&tmp, None, "nowhere");
        let f1 = write_file(&tmp, "a.snx.gz");

        let receipt = engine.submit(&[f1]).await.unwrap();
        assert!(receipt.confirmed.is_empty());
        assert_eq!(receipt.pending, vec!["a.snx.gz"]);
        assert!(tmp.path().join("pending/a.snx.gz").is_file());
        assert_eq!(ledger.pending().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_partial_confirmation() {
        let tmp = TempDir::new().unwrap();
        let endpoint = Arc::new(MockEndpoint::new("cddis"));
        endpoint.confirm_only(&["f1.snx.gz"]);
        let (engine, ledger) = engine_with(&tmp, Some(Arc::clone(&endpoint)), "cddis");

        let f1 = write_file(&tmp, "f1.snx.gz");
        let f2 = write_file(&tmp, "f2.eopi.gz");

        let receipt = engine.submit(&[f1, f2]).await.unwrap();
        assert_eq!(receipt.confirmed, vec!["f1.snx.gz"]);
        assert_eq!(receipt.pending, vec!["f2.eopi.gz"]);

        // Pending copy exists verbatim.
        let queued = std::fs::read(tmp.path().join("pending/f2.eopi.gz")).unwrap();
        assert_eq!(queued, b"f2.eopi.gz");

        let recent = ledger.recent(10).unwrap();
        assert!(recent
            .iter()
            .any(|r| r.file_name == "f1.snx.gz" && r.status == SubmissionStatus::Ok));
        assert!(recent
            .iter()
            .any(|r| r.file_name == "f2.eopi.gz" && r.status == SubmissionStatus::TryLater));
    }

    #[tokio::test]
    async fn test_resubmit_pending_clears_confirmed() {
        let tmp = TempDir::new().unwrap();
        let endpoint = Arc::new(MockEndpoint::new("cddis"));
        endpoint.confirm_only(&[]);
        let (engine, ledger) = engine_with(&tmp, Some(Arc::clone(&endpoint)), "cddis");

        let f1 = write_file(&tmp, "f1.snx.gz");
        engine.submit(&[f1]).await.unwrap();
        assert!(tmp.path().join("pending/f1.snx.gz").is_file());

        // The center comes back; the queued file goes through.
        endpoint.confirm_all();
        let receipt = engine.resubmit_pending().await.unwrap();
        assert_eq!(receipt.confirmed, vec!["f1.snx.gz"]);
        assert!(!tmp.path().join("pending/f1.snx.gz").exists());
        // Ledger now shows the pending row resolved.
        assert!(ledger.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resubmit_with_empty_queue() {
        let tmp = TempDir::new().unwrap();
        let (engine, _ledger) = engine_with(&tmp, None, "cddis");
        let receipt = engine.resubmit_pending().await.unwrap();
        assert!(receipt.confirmed.is_empty());
        assert!(receipt.pending.is_empty());
    }
}
