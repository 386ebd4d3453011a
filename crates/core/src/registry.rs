//! Interactive session registry.
//!
//! Live interactive analysis sessions register a lock file in a shared
//! directory; the ingestion pipeline consults the registry before touching a
//! repository folder and, on a match, leaves a notice file on the same
//! channel so the operator learns a newer bundle is available. This replaces
//! process-table scanning with an explicit local coordination directory.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RegistryConfig;

/// Error type for registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid lock file {path}: {reason}")]
    InvalidLock { path: PathBuf, reason: String },
}

/// Holder fields compared against an incoming artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchField {
    DbName,
    Session,
    Initials,
}

/// One live interactive session, as recorded in its lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HolderInfo {
    /// Registry key, also the lock file stem.
    pub holder: String,
    pub db_name: String,
    pub session: String,
    pub initials: String,
    pub held_since: DateTime<Utc>,
}

/// Notice written back to a holder when its artifact has a newer bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notice {
    pub db_name: String,
    pub message: String,
    pub sent_at: DateTime<Utc>,
}

/// Lock-file directory recording which artifacts are held by interactive
/// sessions.
pub struct SessionRegistry {
    dir: PathBuf,
    match_on: Vec<MatchField>,
    lock_ttl: chrono::Duration,
    work_dir: PathBuf,
}

impl SessionRegistry {
    pub fn new(config: &RegistryConfig, work_dir: &Path) -> Self {
        Self {
            dir: config.dir.clone(),
            match_on: config.match_on.clone(),
            lock_ttl: chrono::Duration::seconds(config.lock_ttl_secs as i64),
            work_dir: work_dir.to_path_buf(),
        }
    }

    /// Register a live session. Used by the interactive tool and by tests.
    pub fn register(&self, info: &HolderInfo) -> Result<(), RegistryError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.lock_path(&info.holder);
        let raw = serde_json::to_string_pretty(info).map_err(|e| RegistryError::InvalidLock {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        std::fs::write(&path, raw)?;
        Ok(())
    }

    /// Release a session's lock and any pending notice.
    pub fn release(&self, holder: &str) -> Result<(), RegistryError> {
        let _ = std::fs::remove_file(self.lock_path(holder));
        let _ = std::fs::remove_file(self.notice_path(holder));
        Ok(())
    }

    /// Find the live session holding `db_name`/`session`, if any. Stale locks
    /// are reaped rather than matched.
    pub fn find_holder(
        &self,
        db_name: &str,
        session: &str,
    ) -> Result<Option<HolderInfo>, RegistryError> {
        if !self.dir.is_dir() {
            return Ok(None);
        }
        let now = Utc::now();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("lock") {
                continue;
            }
            let info = match self.read_lock(&path) {
                Ok(info) => info,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable lock");
                    continue;
                }
            };
            if now - info.held_since > self.lock_ttl {
                debug!(holder = %info.holder, "reaping stale session lock");
                let _ = std::fs::remove_file(&path);
                continue;
            }
            if self.matches(&info, db_name, session) {
                return Ok(Some(info));
            }
        }
        Ok(None)
    }

    /// Send the coordination-channel interrupt: a notice file the interactive
    /// tool polls for.
    pub fn notify_holder(&self, holder: &HolderInfo, message: &str) -> Result<(), RegistryError> {
        let notice = Notice {
            db_name: holder.db_name.clone(),
            message: message.to_string(),
            sent_at: Utc::now(),
        };
        let path = self.notice_path(&holder.holder);
        let raw =
            serde_json::to_string_pretty(&notice).map_err(|e| RegistryError::InvalidLock {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        std::fs::write(&path, raw)?;
        Ok(())
    }

    fn matches(&self, info: &HolderInfo, db_name: &str, session: &str) -> bool {
        for field in &self.match_on {
            match field {
                MatchField::DbName => {
                    if info.db_name == db_name {
                        return true;
                    }
                }
                MatchField::Session => {
                    if !session.is_empty() && info.session.eq_ignore_ascii_case(session) {
                        return true;
                    }
                }
                MatchField::Initials => {
                    if self.spool_references(&info.initials, db_name) {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Whether the spool file for `initials` references `db_name`. Covers
    /// sessions that loaded an artifact through an older solve run.
    fn spool_references(&self, initials: &str, db_name: &str) -> bool {
        if initials.is_empty() {
            return false;
        }
        let path = self.work_dir.join(format!("spool_{initials}.txt"));
        match std::fs::read_to_string(path) {
            Ok(raw) => raw.lines().any(|line| {
                line.strip_prefix("DB_NAME:")
                    .map(|v| v.trim() == db_name)
                    .unwrap_or(false)
            }),
            Err(_) => false,
        }
    }

    fn read_lock(&self, path: &Path) -> Result<HolderInfo, RegistryError> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| RegistryError::InvalidLock {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn lock_path(&self, holder: &str) -> PathBuf {
        self.dir.join(format!("{holder}.lock"))
    }

    fn notice_path(&self, holder: &str) -> PathBuf {
        self.dir.join(format!("{holder}.notice"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry(tmp: &TempDir, match_on: Vec<MatchField>) -> SessionRegistry {
        let config = RegistryConfig {
            dir: tmp.path().join("registry"),
            match_on,
            lock_ttl_secs: 3600,
        };
        SessionRegistry::new(&config, &tmp.path().join("work"))
    }

    fn holder(name: &str, db_name: &str, session: &str, initials: &str) -> HolderInfo {
        HolderInfo {
            holder: name.to_string(),
            db_name: db_name.to_string(),
            session: session.to_string(),
            initials: initials.to_string(),
            held_since: Utc::now(),
        }
    }

    #[test]
    fn test_no_registry_dir_means_idle() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp, vec![MatchField::DbName]);
        assert!(reg.find_holder("24JAN02XE", "r41141").unwrap().is_none());
    }

    #[test]
    fn test_match_by_db_name() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp, vec![MatchField::DbName]);
        reg.register(&holder("aps-1234", "24JAN02XE", "r41141", "WD"))
            .unwrap();

        let found = reg.find_holder("24JAN02XE", "").unwrap();
        assert_eq!(found.unwrap().holder, "aps-1234");
        assert!(reg.find_holder("24JAN08XA", "").unwrap().is_none());
    }

    #[test]
    fn test_match_by_session_code() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp, vec![MatchField::Session]);
        reg.register(&holder("aps-1234", "24JAN02XE", "R41141", "WD"))
            .unwrap();

        // Case-insensitive session match, different db version.
        let found = reg.find_holder("24JAN02XF", "r41141").unwrap();
        assert!(found.is_some());
        assert!(reg.find_holder("24JAN02XF", "r41142").unwrap().is_none());
    }

    #[test]
    fn test_match_by_spool_initials() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp, vec![MatchField::Initials]);
        reg.register(&holder("aps-1234", "", "", "WD")).unwrap();

        let work = tmp.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        std::fs::write(
            work.join("spool_WD.txt"),
            "RUN 1\nDB_NAME: 24JAN02XE\nWRMS: 22.1\n",
        )
        .unwrap();

        assert!(reg.find_holder("24JAN02XE", "").unwrap().is_some());
        assert!(reg.find_holder("24JAN08XA", "").unwrap().is_none());
    }

    #[test]
    fn test_stale_lock_reaped() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp, vec![MatchField::DbName]);
        let mut info = holder("aps-old", "24JAN02XE", "r41141", "WD");
        info.held_since = Utc::now() - chrono::Duration::hours(2);
        reg.register(&info).unwrap();

        assert!(reg.find_holder("24JAN02XE", "").unwrap().is_none());
        assert!(!tmp.path().join("registry/aps-old.lock").exists());
    }

    #[test]
    fn test_notify_holder_writes_notice() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp, vec![MatchField::DbName]);
        let info = holder("aps-1234", "24JAN02XE", "r41141", "WD");
        reg.register(&info).unwrap();
        reg.notify_holder(&info, "newer bundle available").unwrap();

        let raw =
            std::fs::read_to_string(tmp.path().join("registry/aps-1234.notice")).unwrap();
        let notice: Notice = serde_json::from_str(&raw).unwrap();
        assert_eq!(notice.db_name, "24JAN02XE");
        assert!(notice.message.contains("newer bundle"));
    }

    #[test]
    fn test_release_removes_lock_and_notice() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp, vec![MatchField::DbName]);
        let info = holder("aps-1234", "24JAN02XE", "r41141", "WD");
        reg.register(&info).unwrap();
        reg.notify_holder(&info, "ping").unwrap();

        reg.release("aps-1234").unwrap();
        assert!(reg.find_holder("24JAN02XE", "").unwrap().is_none());
        assert!(!tmp.path().join("registry/aps-1234.notice").exists());
    }
}
