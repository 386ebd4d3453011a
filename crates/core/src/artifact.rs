//! Installed session artifacts.
//!
//! A `LocalArtifact` is one extracted session bundle living under the managed
//! repository (`<root>/<yyyy>/<db>`). Its identity comes from the embedded
//! `Head.json`, not from filesystem timestamps. The `History` file is the
//! artifact's own processing record: external tools append their name there
//! when they complete, and the stage orchestrator gates on it.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::bundle::{Head, SessionKind};

/// Error type for artifact operations.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact folder {0} does not exist")]
    NotFound(PathBuf),

    #[error("cannot read artifact {path}: {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid Head.json in {path}: {reason}")]
    InvalidHead { path: PathBuf, reason: String },
}

/// Name of the embedded metadata file.
pub const HEAD_FILE: &str = "Head.json";
/// Name of the per-artifact processing record.
pub const HISTORY_FILE: &str = "History";
/// Optional correlator report shipped inside the bundle.
pub const CORRELATOR_REPORT_FILE: &str = "CorrNotes.txt";

/// An installed, extracted session artifact.
#[derive(Debug, Clone)]
pub struct LocalArtifact {
    folder: PathBuf,
    head: Head,
}

impl LocalArtifact {
    /// Open an installed artifact, reading its embedded metadata.
    pub fn open(folder: &Path) -> Result<Self, ArtifactError> {
        if !folder.is_dir() {
            return Err(ArtifactError::NotFound(folder.to_path_buf()));
        }
        let head_path = folder.join(HEAD_FILE);
        let raw = std::fs::read_to_string(&head_path).map_err(|e| ArtifactError::Unreadable {
            path: head_path.clone(),
            source: e,
        })?;
        let head = serde_json::from_str(&raw).map_err(|e| ArtifactError::InvalidHead {
            path: head_path,
            reason: e.to_string(),
        })?;
        Ok(Self {
            folder: folder.to_path_buf(),
            head,
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Database name, taken from the folder name.
    pub fn db_name(&self) -> &str {
        self.folder
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
    }

    pub fn session(&self) -> &str {
        &self.head.session
    }

    pub fn kind(&self) -> SessionKind {
        self.head.kind
    }

    /// Creation time recorded by the correlator.
    pub fn create_time(&self) -> DateTime<Utc> {
        self.head.created
    }

    /// Tool names recorded as completed in the processing record.
    /// A missing record means nothing has run yet.
    pub fn completed_processes(&self) -> Vec<String> {
        match std::fs::read_to_string(self.folder.join(HISTORY_FILE)) {
            Ok(raw) => raw
                .lines()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Whether `marker` appears in the processing record.
    pub fn has_completed(&self, marker: &str) -> bool {
        self.completed_processes().iter().any(|p| p == marker)
    }

    /// Whether an analysis session of `agency` already went through this
    /// artifact. Interactive sessions append `processed-by <AGENCY>` on save.
    pub fn processed_by(&self, agency: &str) -> bool {
        let marker = format!("processed-by {agency}");
        self.completed_processes().iter().any(|p| p == &marker)
    }

    /// Copy the correlator report shipped with the bundle into the session
    /// directory, returning the saved file name. Returns `Ok(None)` when the
    /// bundle carries no report.
    pub fn save_correlator_report(
        &self,
        session_dir: &Path,
    ) -> Result<Option<String>, std::io::Error> {
        let source = self.folder.join(CORRELATOR_REPORT_FILE);
        if !source.is_file() {
            return Ok(None);
        }
        let dest_dir = session_dir.join(self.session());
        std::fs::create_dir_all(&dest_dir)?;
        let name = format!("{}.corr", self.db_name());
        std::fs::copy(&source, dest_dir.join(&name))?;
        Ok(Some(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::write_test_artifact;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_open_and_metadata() {
        let tmp = TempDir::new().unwrap();
        let created = Utc.with_ymd_and_hms(2024, 1, 3, 10, 30, 0).unwrap();
        let folder = write_test_artifact(tmp.path(), "24JAN02XE", "r41141", created);

        let artifact = LocalArtifact::open(&folder).unwrap();
        assert_eq!(artifact.db_name(), "24JAN02XE");
        assert_eq!(artifact.session(), "r41141");
        assert_eq!(artifact.create_time(), created);
        assert_eq!(artifact.kind(), SessionKind::Standard);
    }

    #[test]
    fn test_open_missing_folder() {
        let tmp = TempDir::new().unwrap();
        let result = LocalArtifact::open(&tmp.path().join("nope"));
        assert!(matches!(result, Err(ArtifactError::NotFound(_))));
    }

    #[test]
    fn test_completed_processes() {
        let tmp = TempDir::new().unwrap();
        let created = Utc.with_ymd_and_hms(2024, 1, 3, 10, 30, 0).unwrap();
        let folder = write_test_artifact(tmp.path(), "24JAN02XE", "r41141", created);
        let artifact = LocalArtifact::open(&folder).unwrap();

        assert!(artifact.completed_processes().is_empty());
        assert!(!artifact.has_completed("vgosDbCalc"));

        std::fs::write(folder.join(HISTORY_FILE), "vgosDbCalc\nvgosDbProcLogs\n").unwrap();
        assert!(artifact.has_completed("vgosDbCalc"));
        assert!(artifact.has_completed("vgosDbProcLogs"));
        assert!(!artifact.has_completed("nuSolve"));
    }

    #[test]
    fn test_processed_by() {
        let tmp = TempDir::new().unwrap();
        let created = Utc.with_ymd_and_hms(2024, 1, 3, 10, 30, 0).unwrap();
        let folder = write_test_artifact(tmp.path(), "24JAN02XE", "r41141", created);
        let artifact = LocalArtifact::open(&folder).unwrap();

        assert!(!artifact.processed_by("GSFC"));
        std::fs::write(folder.join(HISTORY_FILE), "vgosDbCalc\nprocessed-by GSFC\n").unwrap();
        assert!(artifact.processed_by("GSFC"));
        assert!(!artifact.processed_by("BKG"));
    }

    #[test]
    fn test_save_correlator_report() {
        let tmp = TempDir::new().unwrap();
        let created = Utc.with_ymd_and_hms(2024, 1, 3, 10, 30, 0).unwrap();
        let folder = write_test_artifact(tmp.path(), "24JAN02XE", "r41141", created);
        let artifact = LocalArtifact::open(&folder).unwrap();

        let sessions = tmp.path().join("sessions");
        assert_eq!(artifact.save_correlator_report(&sessions).unwrap(), None);

        std::fs::write(folder.join(CORRELATOR_REPORT_FILE), "notes").unwrap();
        let saved = artifact.save_correlator_report(&sessions).unwrap();
        assert_eq!(saved, Some("24JAN02XE.corr".to_string()));
        assert!(sessions.join("r41141/24JAN02XE.corr").is_file());
    }
}
