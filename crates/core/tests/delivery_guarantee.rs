//! Delivery guarantee integration tests.
//!
//! Every file handed to the delivery engine must end confirmed or queued as
//! pending with a matching ledger trail, and pending files must survive until
//! a later confirmed attempt resolves them.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use vget_core::delivery::{
    DeliveryEngine, SqliteLedger, SubmissionLedger, SubmissionStatus,
};
use vget_core::endpoint::ArchiveEndpoint;
use vget_core::testing::MockEndpoint;

struct Harness {
    tmp: TempDir,
    engine: DeliveryEngine,
    endpoint: Arc<MockEndpoint>,
    ledger: Arc<SqliteLedger>,
}

fn harness(primary: &str) -> Harness {
    let tmp = TempDir::new().expect("temp dir");
    let endpoint = Arc::new(MockEndpoint::new("cddis"));
    let ledger = Arc::new(SqliteLedger::in_memory().expect("ledger"));

    let mut endpoints: HashMap<String, Arc<dyn ArchiveEndpoint>> = HashMap::new();
    endpoints.insert("cddis".to_string(), Arc::clone(&endpoint) as _);

    let engine = DeliveryEngine::with_endpoints(
        endpoints,
        primary,
        &tmp.path().join("pending"),
        Arc::clone(&ledger) as Arc<dyn SubmissionLedger>,
    );
    Harness {
        tmp,
        engine,
        endpoint,
        ledger,
    }
}

fn product(h: &Harness, name: &str, content: &[u8]) -> PathBuf {
    let path = h.tmp.path().join(name);
    std::fs::write(&path, content).expect("write product");
    path
}

#[tokio::test]
async fn partial_confirmation_yields_exact_pending_set() {
    let h = harness("cddis");
    h.endpoint.confirm_only(&["f1.snx.gz"]);

    let f1 = product(&h, "f1.snx.gz", b"sinex");
    let f2 = product(&h, "f2.eopi.gz", b"eop series");

    let receipt = h.engine.submit(&[f1, f2]).await.unwrap();
    assert_eq!(receipt.confirmed, vec!["f1.snx.gz"]);
    assert_eq!(receipt.pending, vec!["f2.eopi.gz"]);

    // Ledger: one ok row for f1, one try-later row for f2.
    let recent = h.ledger.recent(10).unwrap();
    assert_eq!(recent.len(), 2);
    assert!(recent
        .iter()
        .any(|r| r.file_name == "f1.snx.gz" && r.status == SubmissionStatus::Ok));
    assert!(recent
        .iter()
        .any(|r| r.file_name == "f2.eopi.gz" && r.status == SubmissionStatus::TryLater));

    // The unconfirmed file sits verbatim in the pending directory.
    let queued = std::fs::read(h.tmp.path().join("pending/f2.eopi.gz")).unwrap();
    assert_eq!(queued, b"eop series");
    // The confirmed one was not queued.
    assert!(!h.tmp.path().join("pending/f1.snx.gz").exists());
}

#[tokio::test]
async fn unknown_primary_center_queues_all_files() {
    let h = harness("unknown-center");
    let f1 = product(&h, "f1.snx.gz", b"sinex");

    let receipt = h.engine.submit(&[f1]).await.unwrap();
    assert!(receipt.confirmed.is_empty());
    assert_eq!(receipt.pending, vec!["f1.snx.gz"]);
    assert!(h.tmp.path().join("pending/f1.snx.gz").is_file());
    // The mock endpoint never saw an upload attempt.
    assert!(h.endpoint.uploaded_batches().is_empty());
}

#[tokio::test]
async fn resubmission_resolves_pending_trail() {
    let h = harness("cddis");
    h.endpoint.confirm_only(&[]);

    let f1 = product(&h, "f1.snx.gz", b"sinex");
    h.engine.submit(&[f1]).await.unwrap();
    assert_eq!(h.ledger.pending().unwrap().len(), 1);

    // Center recovers; the queued file is re-driven and confirmed.
    h.endpoint.confirm_all();
    let receipt = h.engine.resubmit_pending().await.unwrap();
    assert_eq!(receipt.confirmed, vec!["f1.snx.gz"]);
    assert!(receipt.pending.is_empty());

    // Queue drained, ledger pending view resolved, full history kept.
    assert!(!h.tmp.path().join("pending/f1.snx.gz").exists());
    assert!(h.ledger.pending().unwrap().is_empty());
    assert_eq!(h.ledger.recent(10).unwrap().len(), 2);
}

#[tokio::test]
async fn repeated_resubmission_is_safe() {
    let h = harness("cddis");
    h.endpoint.confirm_only(&[]);

    let f1 = product(&h, "f1.snx.gz", b"sinex");
    h.engine.submit(&[f1]).await.unwrap();

    // Two more attempts while the center is down: file stays queued, each
    // attempt appends its own ledger entry.
    h.engine.resubmit_pending().await.unwrap();
    h.engine.resubmit_pending().await.unwrap();
    assert!(h.tmp.path().join("pending/f1.snx.gz").is_file());
    assert_eq!(h.ledger.recent(10).unwrap().len(), 3);
    assert_eq!(h.ledger.pending().unwrap().len(), 3);
}
