//! Prometheus metrics for pipeline components.

use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

/// Bundle downloads by result ("ok", "empty", "failed").
pub static DOWNLOADS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("vget_downloads_total", "Total bundle downloads"),
        &["result"],
    )
    .unwrap()
});

/// Artifact installations by action ("downloaded", "updated").
pub static INSTALLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("vget_installs_total", "Total artifact installations"),
        &["action"],
    )
    .unwrap()
});

/// Stage failures by tool.
pub static STAGE_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("vget_stage_failures_total", "Wrapper tool stage failures"),
        &["tool"],
    )
    .unwrap()
});

/// Submission records by status ("ok", "try_later").
pub static SUBMISSIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("vget_submissions_total", "Delivery submissions"),
        &["status"],
    )
    .unwrap()
});

/// Notices sent to interactive session holders.
pub static NOTICES_SENT: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("vget_notices_sent_total", "Busy-session notices sent").unwrap()
});

/// Register all pipeline metrics with a registry.
pub fn register_all(registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(DOWNLOADS.clone()))?;
    registry.register(Box::new(INSTALLS.clone()))?;
    registry.register(Box::new(STAGE_FAILURES.clone()))?;
    registry.register(Box::new(SUBMISSIONS.clone()))?;
    registry.register(Box::new(NOTICES_SENT.clone()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_all() {
        let registry = Registry::new();
        register_all(&registry).unwrap();
        DOWNLOADS.with_label_values(&["ok"]).inc();
        let families = registry.gather();
        assert!(families.iter().any(|f| f.get_name() == "vget_downloads_total"));
    }
}
