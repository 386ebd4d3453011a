//! Operator-facing collaborators: notifications, report text, mail.
//!
//! The pipeline only depends on these traits; real delivery (watchdog
//! channels, report formatting, SMTP) lives outside the core and must never
//! block or fail a run.

use crate::artifact::LocalArtifact;

/// Error type for mail delivery.
#[derive(Debug, thiserror::Error)]
#[error("mail delivery failed: {0}")]
pub struct MailError(pub String);

/// Outcome sink for operator visibility. Implementations must not block.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

/// Default sink: structured log lines.
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, title: &str, message: &str) {
        for line in message.lines().filter(|l| !l.is_empty()) {
            tracing::info!(target: "vget::notify", "{title} - {line}");
        }
    }
}

/// Produces the analysis report text for a processed artifact.
pub trait ReportBuilder: Send + Sync {
    fn build(&self, artifact: &LocalArtifact, summary: &str) -> String;
}

/// Minimal report layout used when no site-specific builder is wired in.
pub struct PlainReportBuilder {
    agency: String,
}

impl PlainReportBuilder {
    pub fn new(agency: impl Into<String>) -> Self {
        Self {
            agency: agency.into(),
        }
    }
}

impl ReportBuilder for PlainReportBuilder {
    fn build(&self, artifact: &LocalArtifact, summary: &str) -> String {
        format!(
            "Analysis report for {db} ({session})\nAnalysis center: {agency}\n\n{summary}\n",
            db = artifact.db_name(),
            session = artifact.session(),
            agency = self.agency,
        )
    }
}

/// Sends the analyst email after an unattended run.
pub trait Mailer: Send + Sync {
    fn send(&self, subject: &str, body: &str) -> Result<(), MailError>;
}

/// Mailer used when no mail transport is configured.
pub struct NoopMailer;

impl Mailer for NoopMailer {
    fn send(&self, subject: &str, _body: &str) -> Result<(), MailError> {
        tracing::debug!(subject, "mail transport not configured, skipping");
        Ok(())
    }
}
