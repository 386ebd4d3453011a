//! End-to-end ingestion control.
//!
//! Drives one artifact through download, identity check, concurrency guard,
//! installation, stage orchestration and the optional unattended analysis
//! chain. One artifact is processed end-to-end at a time; every terminal
//! outcome emits exactly one notification.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::artifact::LocalArtifact;
use crate::autosolve::{AutoSolveChain, AutoSolveError};
use crate::bundle::{
    matches_file_name_template, parse_db_name, repository_folder, Bundle,
};
use crate::config::{Config, ConfigError};
use crate::delivery::{DeliveryEngine, SubmissionLedger};
use crate::endpoint::{build_endpoint, join_remote, walk, ArchiveEndpoint};
use crate::identity::{self, IdentityOutcome, Newness};
use crate::installer;
use crate::metrics;
use crate::notify::{Mailer, Notifier, ReportBuilder};
use crate::registry::{RegistryError, SessionRegistry};
use crate::stages::{resolve_steps, StageError, StageRunner};

/// Bounded retry for empty or failed downloads.
const DOWNLOAD_ATTEMPTS: u32 = 5;
const DOWNLOAD_BACKOFF: Duration = Duration::from_secs(1);

const NOTIFY_TITLE: &str = "VGOS DB";

/// Error type for ingestion. Most failures are classified outcomes; errors
/// are reserved for infrastructure trouble.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("unknown archive center {0}")]
    UnknownCenter(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    AutoSolve(#[from] AutoSolveError),
}

/// Classified terminal outcome of one ingestion run.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    /// Installed and processed; waiting for an analyst.
    Ready { db_name: String, action: Newness },
    /// Installed and fully processed by the unattended chain.
    AutoProcessed { db_name: String, ok: bool },
    /// Nothing newer than what is installed.
    NoUpdate { db_name: String, reason: String },
    /// A live interactive session holds the artifact; it was signalled and
    /// installation skipped.
    Busy { db_name: String, holder: String },
    /// Remote name not acceptable for this center.
    Rejected { name: String },
    DownloadFailed { name: String },
    InstallFailed { db_name: String, reason: String },
    /// A stage's completion marker never appeared; the artifact stays
    /// installed for manual follow-up.
    StageFailed { db_name: String, failed_step: String },
}

/// The ingestion pipeline controller.
pub struct IngestController {
    config: Config,
    archive: HashMap<String, Arc<dyn ArchiveEndpoint>>,
    registry: SessionRegistry,
    runner: StageRunner,
    autosolve: AutoSolveChain,
    delivery: Arc<DeliveryEngine>,
    notifier: Arc<dyn Notifier>,
}

impl IngestController {
    /// Assemble a controller from pre-built components.
    pub fn new(
        config: Config,
        archive: HashMap<String, Arc<dyn ArchiveEndpoint>>,
        delivery: Arc<DeliveryEngine>,
        notifier: Arc<dyn Notifier>,
        report_builder: Arc<dyn ReportBuilder>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let registry = SessionRegistry::new(&config.registry, &config.repository.work_dir);
        let runner = StageRunner::new(config.agency.code.clone());
        let autosolve = AutoSolveChain::new(
            &config.repository.work_dir,
            Arc::clone(&delivery),
            report_builder,
            mailer,
        );
        Self {
            config,
            archive,
            registry,
            runner,
            autosolve,
            delivery,
            notifier,
        }
    }

    /// Build every configured endpoint and wire the full pipeline.
    pub fn from_config(
        config: Config,
        ledger: Arc<dyn SubmissionLedger>,
        notifier: Arc<dyn Notifier>,
        report_builder: Arc<dyn ReportBuilder>,
        mailer: Arc<dyn Mailer>,
    ) -> Result<Self, ConfigError> {
        let mut archive = HashMap::new();
        for (code, endpoint_config) in &config.archive {
            archive.insert(code.clone(), build_endpoint(code, endpoint_config)?);
        }
        let delivery = Arc::new(DeliveryEngine::new(&config.delivery, ledger)?);
        Ok(Self::new(
            config,
            archive,
            delivery,
            notifier,
            report_builder,
            mailer,
        ))
    }

    pub fn delivery(&self) -> &Arc<DeliveryEngine> {
        &self.delivery
    }

    /// Ingest one remote bundle end-to-end.
    pub async fn process(
        &self,
        center: &str,
        remote_path: &str,
    ) -> Result<IngestOutcome, IngestError> {
        let endpoint = self
            .archive
            .get(center)
            .ok_or_else(|| IngestError::UnknownCenter(center.to_string()))?;
        let origin = center.to_uppercase();
        let basename = remote_path.rsplit('/').next().unwrap_or(remote_path);

        let Some(db_name) = self.accept_name(center, basename) else {
            let message = format!("{basename} from {origin} has not been downloaded [Not accepted name]");
            info!("{message}");
            self.notifier.notify(NOTIFY_TITLE, &message);
            return Ok(IngestOutcome::Rejected {
                name: basename.to_string(),
            });
        };

        let target = repository_folder(&self.config.repository.root, &db_name);

        let Some(temp) = self.download_bundle(endpoint.as_ref(), remote_path).await else {
            metrics::DOWNLOADS.with_label_values(&["failed"]).inc();
            let warnings = endpoint.drain_warnings().join("\n");
            self.notifier.notify(
                NOTIFY_TITLE,
                &format!("Download failed for {db_name} from {origin}\n{warnings}"),
            );
            return Ok(IngestOutcome::DownloadFailed {
                name: basename.to_string(),
            });
        };
        metrics::DOWNLOADS.with_label_values(&["ok"]).inc();

        let bundle = Bundle::new(db_name.clone(), temp);
        let head = match bundle.head() {
            Ok(head) => head,
            Err(e) => {
                remove_temp(bundle.path());
                let reason = e.to_string();
                self.notifier.notify(
                    NOTIFY_TITLE,
                    &format!("{db_name} from {origin} not downloaded [{reason}]"),
                );
                return Ok(IngestOutcome::NoUpdate { db_name, reason });
            }
        };

        let action = match identity::check(&head, &target) {
            IdentityOutcome::Fresh(action) => action,
            IdentityOutcome::Stale => {
                remove_temp(bundle.path());
                let reason = "created time same or older".to_string();
                warn!(db = %db_name, origin = %origin, "{reason}");
                self.notifier.notify(
                    NOTIFY_TITLE,
                    &format!("{db_name} from {origin} not downloaded [{reason}]"),
                );
                return Ok(IngestOutcome::NoUpdate { db_name, reason });
            }
            IdentityOutcome::Unreadable(reason) => {
                remove_temp(bundle.path());
                warn!(db = %db_name, origin = %origin, "{reason}");
                self.notifier.notify(
                    NOTIFY_TITLE,
                    &format!("{db_name} from {origin} not downloaded [{reason}]"),
                );
                return Ok(IngestOutcome::NoUpdate { db_name, reason });
            }
        };

        if let Some(holder) = self.registry.find_holder(&db_name, &head.session)? {
            remove_temp(bundle.path());
            self.registry.notify_holder(
                &holder,
                &format!(
                    "There is a new bundle for {db_name} ready for download.\n\
                     Close your session to let the automatic process install it; \
                     it will try again on the next run."
                ),
            )?;
            metrics::NOTICES_SENT.inc();
            self.notifier.notify(
                NOTIFY_TITLE,
                &format!("An interactive session ({}) is processing {db_name}", holder.holder),
            );
            return Ok(IngestOutcome::Busy {
                db_name,
                holder: holder.holder,
            });
        }

        if let Err(e) = installer::install(&bundle, &target) {
            remove_temp(bundle.path());
            let reason = e.to_string();
            self.notifier.notify(
                NOTIFY_TITLE,
                &format!("Installation of {db_name} failed [{reason}]"),
            );
            return Ok(IngestOutcome::InstallFailed { db_name, reason });
        }
        remove_temp(bundle.path());
        metrics::INSTALLS.with_label_values(&[action.as_str()]).inc();
        info!(db = %db_name, origin = %origin, action = action.as_str(), "artifact installed");

        self.process_installed(&db_name, &origin, &target, action).await
    }

    /// Run stages and the downstream chain over a freshly installed artifact.
    async fn process_installed(
        &self,
        db_name: &str,
        origin: &str,
        target: &Path,
        action: Newness,
    ) -> Result<IngestOutcome, IngestError> {
        let artifact = match LocalArtifact::open(target) {
            Ok(artifact) => artifact,
            Err(e) => {
                let reason = e.to_string();
                self.notifier.notify(
                    NOTIFY_TITLE,
                    &format!("Installed {db_name} is not usable [{reason}]"),
                );
                return Ok(IngestOutcome::InstallFailed {
                    db_name: db_name.to_string(),
                    reason,
                });
            }
        };

        let steps = resolve_steps(&self.config.steps, artifact.kind());
        let report = self.runner.run(&artifact, &steps).await?;

        if self.config.repository.save_correlator_report {
            match artifact.save_correlator_report(&self.config.repository.session_dir) {
                Ok(Some(name)) => info!(db = %db_name, "{name} saved to {}", artifact.session()),
                Ok(None) => {}
                Err(e) => warn!(db = %db_name, error = %e, "could not save correlator report"),
            }
        }

        if !report.ok {
            let failed_step = report.failed_step.clone().unwrap_or_default();
            self.notifier.notify(
                NOTIFY_TITLE,
                &format!(
                    "{db_name} from {origin} installed but processing stopped\n{}",
                    report.diagnostics()
                ),
            );
            return Ok(IngestOutcome::StageFailed {
                db_name: db_name.to_string(),
                failed_step,
            });
        }

        if let Some(options) = self.config.auto.get(artifact.kind().as_str()) {
            let outcome = self.autosolve.run(&artifact, options).await?;
            let title = format!(
                "{db_name} ({}) has been automatically processed{}",
                artifact.session(),
                if outcome.ok { "" } else { " [PROBLEM]" }
            );
            self.notifier.notify(
                &title,
                &format!(
                    "{db_name} from {origin} has been processed in {}\n{}",
                    artifact.folder().display(),
                    outcome.digest
                ),
            );
            return Ok(IngestOutcome::AutoProcessed {
                db_name: db_name.to_string(),
                ok: outcome.ok,
            });
        }

        let title = format!(
            "{db_name} ({}) has been {} and is ready for processing",
            artifact.session(),
            action.as_str()
        );
        let completed = if report.already_processed {
            format!("already processed by {}", self.config.agency.code)
        } else {
            report.completed.join(", ")
        };
        self.notifier.notify(
            &title,
            &format!(
                "{db_name} from {origin} is available at {}\n\nCompleted: {completed}",
                artifact.folder().display()
            ),
        );
        Ok(IngestOutcome::Ready {
            db_name: db_name.to_string(),
            action,
        })
    }

    /// Walk a center's watched tree and ingest every acceptable bundle,
    /// sequentially.
    pub async fn scan(&self, center: &str) -> Result<Vec<IngestOutcome>, IngestError> {
        let endpoint = self
            .archive
            .get(center)
            .ok_or_else(|| IngestError::UnknownCenter(center.to_string()))?;
        let config = self
            .config
            .archive
            .get(center)
            .ok_or_else(|| IngestError::UnknownCenter(center.to_string()))?;

        if !endpoint.is_connected() && endpoint.connect().await.is_err() {
            for warning in endpoint.drain_warnings() {
                warn!(center, "{warning}");
            }
            return Ok(Vec::new());
        }

        let top = if config.scan.is_empty() {
            config.root.clone()
        } else {
            join_remote(&config.root, &config.scan)
        };
        let entries = match walk(endpoint.as_ref(), &top, &self.config.repository.reject).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(center, error = %e, "walk failed");
                return Ok(Vec::new());
            }
        };

        let mut outcomes = Vec::new();
        for entry in entries {
            if parse_db_name(&entry.name).is_none() {
                continue;
            }
            outcomes.push(self.process(center, &entry.path).await?);
        }
        endpoint.close().await;
        Ok(outcomes)
    }

    /// Ingest one session by database name, using the center's file name
    /// template to locate the bundle.
    pub async fn fetch(&self, center: &str, db_name: &str) -> Result<IngestOutcome, IngestError> {
        let config = self
            .config
            .archive
            .get(center)
            .ok_or_else(|| IngestError::UnknownCenter(center.to_string()))?;
        let year = crate::bundle::db_year(db_name)
            .map(|y| y.to_string())
            .unwrap_or_default();
        let relative = if config.file_name.is_empty() {
            format!("{year}/{db_name}.tgz")
        } else {
            config
                .file_name
                .replace("{db_name}", db_name)
                .replace("{year}", &year)
        };
        let remote_path = join_remote(&config.root, &relative);

        let endpoint = self
            .archive
            .get(center)
            .ok_or_else(|| IngestError::UnknownCenter(center.to_string()))?;
        if !endpoint.is_connected() && endpoint.connect().await.is_err() {
            let warnings = endpoint.drain_warnings().join("\n");
            self.notifier.notify(
                NOTIFY_TITLE,
                &format!("Download failed for {db_name} from {center}\n{warnings}"),
            );
            return Ok(IngestOutcome::DownloadFailed {
                name: db_name.to_string(),
            });
        }

        match endpoint.file_info(&remote_path).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                self.notifier.notify(
                    NOTIFY_TITLE,
                    &format!("{db_name} is not available at {center} ({remote_path})"),
                );
                return Ok(IngestOutcome::DownloadFailed {
                    name: db_name.to_string(),
                });
            }
            Err(e) => {
                warn!(center, db_name, error = %e, "file probe failed");
            }
        }

        let outcome = self.process(center, &remote_path).await;
        endpoint.close().await;
        outcome
    }

    /// Validate a remote name against the database-name pattern and the
    /// center's expected file name template.
    fn accept_name(&self, center: &str, basename: &str) -> Option<String> {
        let db_name = parse_db_name(basename)?;
        if let Some(config) = self.config.archive.get(center) {
            if !config.file_name.is_empty()
                && !matches_file_name_template(&config.file_name, &db_name, basename)
            {
                return None;
            }
        }
        Some(db_name)
    }

    /// Download with the empty-file retry loop. Early listings can race the
    /// remote writer, producing zero-length results.
    async fn download_bundle(
        &self,
        endpoint: &dyn ArchiveEndpoint,
        remote_path: &str,
    ) -> Option<PathBuf> {
        for attempt in 1..=DOWNLOAD_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(DOWNLOAD_BACKOFF).await;
            }
            if !endpoint.is_connected() {
                if let Err(e) = endpoint.connect().await {
                    warn!(attempt, error = %e, "connect failed");
                    continue;
                }
            }
            let temp = std::env::temp_dir().join(format!("vget-{}", Uuid::new_v4()));
            match endpoint.download(remote_path, &temp).await {
                Ok(_digest) => {
                    let size = std::fs::metadata(&temp).map(|m| m.len()).unwrap_or(0);
                    if size > 0 {
                        return Some(temp);
                    }
                    metrics::DOWNLOADS.with_label_values(&["empty"]).inc();
                    warn!(attempt, remote_path, "downloaded file is empty");
                    remove_temp(&temp);
                }
                Err(e) => {
                    warn!(attempt, remote_path, error = %e, "download failed");
                    remove_temp(&temp);
                }
            }
        }
        None
    }
}

fn remove_temp(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "could not remove temp file");
        }
    }
}
