//! Stage orchestration.
//!
//! Runs the ordered external wrapper-tool steps over an installed artifact.
//! A step only counts as done when its marker shows up in the artifact's own
//! processing record; a missing marker stops the run immediately with the
//! step's captured output, and later steps are never attempted.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, warn};

use crate::artifact::LocalArtifact;
use crate::bundle::SessionKind;
use crate::config::StepConfig;
use crate::metrics;

/// Error type for stage execution.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("could not spawn {tool} ({executable}): {source}")]
    Spawn {
        tool: String,
        executable: String,
        source: std::io::Error,
    },
}

/// One resolved external processing step.
#[derive(Debug, Clone)]
pub struct ProcessingStep {
    pub tool: String,
    pub executable: PathBuf,
    /// Kind-specific option string, whitespace-split into arguments.
    pub options: String,
    /// Marker expected in the processing record after the step.
    pub marker: String,
    pub process_vgos: bool,
}

impl ProcessingStep {
    fn applies_to(&self, kind: SessionKind) -> bool {
        kind != SessionKind::Vgos || self.process_vgos
    }
}

/// Resolve configured steps for one session kind, dropping steps that do not
/// apply and picking the kind's option string.
pub fn resolve_steps(configs: &[StepConfig], kind: SessionKind) -> Vec<ProcessingStep> {
    configs
        .iter()
        .map(|cfg| ProcessingStep {
            tool: cfg.tool.clone(),
            executable: resolve_executable(&cfg.tool, cfg.executable.as_deref()),
            options: cfg
                .options
                .get(kind.as_str())
                .cloned()
                .unwrap_or_default(),
            marker: cfg.marker.clone().unwrap_or_else(|| cfg.tool.clone()),
            process_vgos: cfg.process_vgos,
        })
        .filter(|step| step.applies_to(kind))
        .collect()
}

/// Explicit path wins; otherwise the tool is looked up on `PATH`, falling
/// back to the bare name.
pub fn resolve_executable(tool: &str, explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Some(paths) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths) {
            let candidate = dir.join(tool);
            if candidate.is_file() {
                return candidate;
            }
        }
    }
    PathBuf::from(tool)
}

/// Result of a stage run.
#[derive(Debug, Clone, Default)]
pub struct StageReport {
    pub ok: bool,
    /// The artifact already carried this agency's marker; nothing ran.
    pub already_processed: bool,
    /// Tools verified complete, in execution order.
    pub completed: Vec<String>,
    pub failed_step: Option<String>,
    /// Captured output of the failed step only.
    pub stdout: String,
    pub stderr: String,
}

impl StageReport {
    /// Human-readable diagnostics bundle for notifications.
    pub fn diagnostics(&self) -> String {
        match &self.failed_step {
            Some(step) => format!(
                "{step} failed!\n--- stdout ---\n{}\n--- stderr ---\n{}",
                self.stdout, self.stderr
            ),
            None => String::new(),
        }
    }
}

/// Executes processing steps strictly in order with marker verification.
pub struct StageRunner {
    agency: String,
}

impl StageRunner {
    pub fn new(agency: impl Into<String>) -> Self {
        Self {
            agency: agency.into(),
        }
    }

    pub async fn run(
        &self,
        artifact: &LocalArtifact,
        steps: &[ProcessingStep],
    ) -> Result<StageReport, StageError> {
        if artifact.processed_by(&self.agency) {
            warn!(
                db = artifact.db_name(),
                agency = %self.agency,
                "artifact already processed by this agency"
            );
            return Ok(StageReport {
                ok: true,
                already_processed: true,
                ..Default::default()
            });
        }

        let mut report = StageReport {
            ok: true,
            ..Default::default()
        };

        for step in steps {
            debug!(db = artifact.db_name(), tool = %step.tool, "running stage");
            let output = Command::new(&step.executable)
                .args(step.options.split_whitespace())
                .arg(artifact.folder())
                .output()
                .await
                .map_err(|source| StageError::Spawn {
                    tool: step.tool.clone(),
                    executable: step.executable.display().to_string(),
                    source,
                })?;

            // Completion is judged by the artifact's own record, not the
            // exit status.
            if artifact.has_completed(&step.marker) {
                report.completed.push(step.tool.clone());
                continue;
            }

            metrics::STAGE_FAILURES
                .with_label_values(&[step.tool.as_str()])
                .inc();
            report.ok = false;
            report.failed_step = Some(step.tool.clone());
            report.stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            report.stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            for line in report.stdout.lines().chain(report.stderr.lines()) {
                if !line.is_empty() {
                    warn!(db = artifact.db_name(), tool = %step.tool, "{line}");
                }
            }
            break;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{write_step_script, write_test_artifact};
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn step_config(tool: &str) -> StepConfig {
        StepConfig {
            tool: tool.to_string(),
            executable: None,
            options: HashMap::new(),
            process_vgos: false,
            marker: None,
        }
    }

    #[test]
    fn test_resolve_steps_kind_options() {
        let mut cfg = step_config("vgosDbCalc");
        cfg.options
            .insert("standard".to_string(), "-a".to_string());
        cfg.options
            .insert("intensive".to_string(), "-i".to_string());

        let standard = resolve_steps(&[cfg.clone()], SessionKind::Standard);
        assert_eq!(standard[0].options, "-a");
        let intensive = resolve_steps(&[cfg], SessionKind::Intensive);
        assert_eq!(intensive[0].options, "-i");
    }

    #[test]
    fn test_resolve_steps_vgos_gating() {
        let plain = step_config("vgosDbCalc");
        let mut vgos_capable = step_config("vgosDbProcLogs");
        vgos_capable.process_vgos = true;

        let steps = resolve_steps(&[plain.clone(), vgos_capable.clone()], SessionKind::Vgos);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].tool, "vgosDbProcLogs");

        let steps = resolve_steps(&[plain, vgos_capable], SessionKind::Standard);
        assert_eq!(steps.len(), 2);
    }

    #[test]
    fn test_resolve_executable_explicit_wins() {
        let path = resolve_executable("anything", Some(Path::new("/opt/bin/anything")));
        assert_eq!(path, PathBuf::from("/opt/bin/anything"));
    }

    fn artifact(tmp: &TempDir) -> LocalArtifact {
        let created = Utc.with_ymd_and_hms(2024, 1, 3, 10, 0, 0).unwrap();
        let folder = write_test_artifact(tmp.path(), "24JAN02XE", "r41141", created);
        LocalArtifact::open(&folder).unwrap()
    }

    fn marking_step(tmp: &TempDir, tool: &str) -> ProcessingStep {
        let script = write_step_script(tmp.path(), tool, true);
        ProcessingStep {
            tool: tool.to_string(),
            executable: script,
            options: String::new(),
            marker: tool.to_string(),
            process_vgos: false,
        }
    }

    fn silent_step(tmp: &TempDir, tool: &str) -> ProcessingStep {
        let script = write_step_script(tmp.path(), tool, false);
        ProcessingStep {
            tool: tool.to_string(),
            executable: script,
            options: String::new(),
            marker: tool.to_string(),
            process_vgos: false,
        }
    }

    #[tokio::test]
    async fn test_all_steps_succeed() {
        let tmp = TempDir::new().unwrap();
        let artifact = artifact(&tmp);
        let steps = vec![marking_step(&tmp, "vgosDbCalc"), marking_step(&tmp, "vgosDbProcLogs")];

        let report = StageRunner::new("GSFC").run(&artifact, &steps).await.unwrap();
        assert!(report.ok);
        assert_eq!(report.completed, vec!["vgosDbCalc", "vgosDbProcLogs"]);
        assert!(report.diagnostics().is_empty());
    }

    #[tokio::test]
    async fn test_fail_fast_skips_later_steps() {
        let tmp = TempDir::new().unwrap();
        let artifact = artifact(&tmp);
        let steps = vec![
            marking_step(&tmp, "s1"),
            silent_step(&tmp, "s2"),
            marking_step(&tmp, "s3"),
        ];

        let report = StageRunner::new("GSFC").run(&artifact, &steps).await.unwrap();
        assert!(!report.ok);
        assert_eq!(report.completed, vec!["s1"]);
        assert_eq!(report.failed_step.as_deref(), Some("s2"));
        // s3 never ran: its marker is absent from the record.
        assert!(!artifact.has_completed("s3"));
        assert!(report.diagnostics().contains("s2 failed!"));
    }

    #[tokio::test]
    async fn test_already_processed_artifact_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let artifact = artifact(&tmp);
        std::fs::write(artifact.folder().join("History"), "processed-by GSFC\n").unwrap();

        let steps = vec![marking_step(&tmp, "vgosDbCalc")];
        let report = StageRunner::new("GSFC").run(&artifact, &steps).await.unwrap();
        assert!(report.ok);
        assert!(report.already_processed);
        assert!(report.completed.is_empty());
    }
}
