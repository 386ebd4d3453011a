//! Unattended post-solve analysis.
//!
//! When an installed artifact's kind is configured for unattended
//! processing, this chain runs the solve tool, copies its spool listing into
//! the session tree, then drives the configured post-solve actions and
//! product submissions in declared order, short-circuiting on the first
//! failure. Every exit path yields one consolidated status digest.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::process::Command;
use tracing::{info, warn};
use uuid::Uuid;

use crate::artifact::LocalArtifact;
use crate::config::AutoConfig;
use crate::delivery::{DeliveryEngine, DeliveryReceipt};
use crate::notify::{Mailer, ReportBuilder};

/// Solve output lines worth carrying into the digest.
const SUMMARY_KEYS: [&str; 6] = [
    "WRMS",
    "DoF",
    "Chi^2/DoF",
    "dUT1 value",
    "dUT1 adjustment",
    "dUT1 std.dev",
];

/// Error type for chain execution.
#[derive(Debug, thiserror::Error)]
pub enum AutoSolveError {
    #[error("could not run '{command}': {source}")]
    Exec {
        command: String,
        source: std::io::Error,
    },
}

/// Consolidated result of one unattended run.
#[derive(Debug, Clone)]
pub struct AutoOutcome {
    pub ok: bool,
    /// Multi-line status digest for the notification sink.
    pub digest: String,
}

/// Keep the solve summary lines the operators care about.
fn parse_solve_summary(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| {
            line.split(':')
                .next()
                .map(|key| SUMMARY_KEYS.contains(&key.trim()))
                .unwrap_or(false)
        })
        .map(|line| line.trim().to_string())
        .collect()
}

/// Default initials from an identity file, falling back to the configured
/// ones.
fn resolve_initials(options: &AutoConfig) -> String {
    if let Some(path) = &options.identity_file {
        if let Ok(raw) = std::fs::read_to_string(path) {
            if let Ok(value) = raw.parse::<toml::Value>() {
                if let Some(initials) = value
                    .get("identities")
                    .and_then(|t| t.get("default_initials"))
                    .and_then(|v| v.as_str())
                {
                    return initials.to_string();
                }
            }
        }
        warn!(path = %path.display(), "could not read identity file, using configured initials");
    }
    options.initials.clone()
}

async fn run_shell(command: &str) -> Result<(bool, String), AutoSolveError> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .output()
        .await
        .map_err(|source| AutoSolveError::Exec {
            command: command.to_string(),
            source,
        })?;
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok((output.status.success(), text))
}

/// Runs the unattended analysis chain for one artifact.
pub struct AutoSolveChain {
    work_dir: PathBuf,
    delivery: Arc<DeliveryEngine>,
    report_builder: Arc<dyn ReportBuilder>,
    mailer: Arc<dyn Mailer>,
}

impl AutoSolveChain {
    pub fn new(
        work_dir: &Path,
        delivery: Arc<DeliveryEngine>,
        report_builder: Arc<dyn ReportBuilder>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            delivery,
            report_builder,
            mailer,
        }
    }

    pub async fn run(
        &self,
        artifact: &LocalArtifact,
        options: &AutoConfig,
    ) -> Result<AutoOutcome, AutoSolveError> {
        let db_name = artifact.db_name().to_string();
        let mut summary: Vec<String> = vec![
            String::new(),
            "nuSolve solution summary".to_string(),
            "-".repeat(24),
            String::new(),
        ];
        let mut problems: Vec<String> = Vec::new();

        // Solve first; nothing downstream makes sense without a solution.
        let solve_cmd = options.cmd.replace("{db_name}", &db_name);
        let (status_ok, output) = run_shell(&solve_cmd).await?;
        let solution = parse_solve_summary(&output);
        if !status_ok || solution.is_empty() {
            problems.push(format!("{solve_cmd} produced no solution"));
            problems.push(output);
            return Ok(self.finish(summary, problems));
        }
        summary.extend(solution);
        summary.push(String::new());

        let initials = resolve_initials(options);
        let spool = self.work_dir.join(format!("spool_{initials}.txt"));

        if let Some(template) = &options.copy {
            let dest = PathBuf::from(template.replace("{db_name}", &db_name));
            if let Some(parent) = dest.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    problems.push(format!("could not create {}: {e}", parent.display()));
                    return Ok(self.finish(summary, problems));
                }
            }
            if let Err(e) = std::fs::copy(&spool, &dest) {
                problems.push(format!(
                    "could not copy spool {} to {}: {e}",
                    spool.display(),
                    dest.display()
                ));
                return Ok(self.finish(summary, problems));
            }
            summary.push(format!("Spool file copied to {}", dest.display()));
        }

        summary.push(String::new());
        summary.push("APS processing".to_string());
        summary.push("-".repeat(14));

        let mut actions_ok = true;
        for action in options.actions.iter().filter(|a| a.required) {
            let command = action.command.replace("{db_name}", &db_name);
            let (ok, output) = run_shell(&command).await?;
            if !ok {
                problems.push(format!("{} failed", action.name));
                problems.push(output);
                actions_ok = false;
                break;
            }
            summary.push(format!("{} done {}", action.name, Utc::now().format("%Y-%m-%d %H:%M:%S")));
        }
        if !actions_ok {
            return Ok(self.finish(summary, problems));
        }

        let mut submissions_ok = true;
        for submission in options.submissions.iter().filter(|s| s.required) {
            match self.submit_products(&submission.files, &db_name).await {
                Ok(receipt) => {
                    for name in &receipt.pending {
                        info!(file = %name, "will be uploaded later");
                        summary.push(format!(
                            "{}: {name} will be uploaded later",
                            submission.name
                        ));
                    }
                    for name in &receipt.confirmed {
                        summary.push(format!("{}: {name} submitted", submission.name));
                    }
                }
                Err(reason) => {
                    problems.push(format!("{} failed: {reason}", submission.name));
                    submissions_ok = false;
                    break;
                }
            }
        }
        if !submissions_ok {
            return Ok(self.finish(summary, problems));
        }

        if options.analyst {
            if let Err(reason) = self.submit_report(artifact, &spool, &mut summary).await {
                problems.push(reason);
            }
        }

        Ok(self.finish(summary, problems))
    }

    /// Resolve one submission's file templates and push them through the
    /// delivery engine. Missing products are an error, not a skip.
    async fn submit_products(
        &self,
        templates: &[String],
        db_name: &str,
    ) -> Result<DeliveryReceipt, String> {
        let mut files = Vec::new();
        for template in templates {
            let path = PathBuf::from(
                template
                    .replace("{db_name}", db_name)
                    .replace("{work_dir}", &self.work_dir.display().to_string()),
            );
            if !path.is_file() {
                return Err(format!("product {} does not exist", path.display()));
            }
            files.push(path);
        }
        self.delivery.submit(&files).await.map_err(|e| e.to_string())
    }

    /// Generate the analysis report, submit it with the spool file, and send
    /// the analyst email.
    async fn submit_report(
        &self,
        artifact: &LocalArtifact,
        spool: &Path,
        summary: &mut Vec<String>,
    ) -> Result<(), String> {
        let text = self
            .report_builder
            .build(artifact, &summary.join("\n"));
        let report_path = self.work_dir.join(format!(
            "{}_report_{}.txt",
            artifact.session(),
            Uuid::new_v4()
        ));
        std::fs::write(&report_path, &text)
            .map_err(|e| format!("could not write report {}: {e}", report_path.display()))?;

        info!(db = artifact.db_name(), "submit analysis report and spool file");
        let receipt = self
            .delivery
            .submit(&[report_path.clone(), spool.to_path_buf()])
            .await
            .map_err(|e| e.to_string())?;
        for name in &receipt.confirmed {
            summary.push(format!("{name} submitted"));
        }
        for name in &receipt.pending {
            summary.push(format!("{name} will be uploaded later"));
        }

        let subject = format!(
            "{} ({}) analysis report",
            artifact.db_name(),
            artifact.session()
        );
        match self.mailer.send(&subject, &text) {
            Ok(()) => summary.push("Analysis report sent to analysis mail list".to_string()),
            Err(e) => return Err(format!("Failed sending report: {e}")),
        }
        Ok(())
    }

    fn finish(&self, summary: Vec<String>, problems: Vec<String>) -> AutoOutcome {
        let ok = problems.is_empty();
        let mut digest = summary.join("\n");
        if !ok {
            digest.push_str("\n\nPROBLEMS\n--------\n");
            digest.push_str(&problems.join("\n"));
        }
        AutoOutcome { ok, digest }
    }
}
