//! Artifact identity check.
//!
//! Decides whether a downloaded bundle is newer than what is installed using
//! the creation time embedded in the bundle, never filesystem mtimes (which
//! do not survive transfer). An unreadable installed folder is reported as
//! such rather than overwritten.

use std::path::Path;

use crate::artifact::LocalArtifact;
use crate::bundle::Head;

/// Why a bundle counts as new.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Newness {
    /// No installed folder existed.
    Downloaded,
    /// Embedded creation time is newer than the installed artifact's.
    Updated,
}

impl Newness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Newness::Downloaded => "downloaded",
            Newness::Updated => "updated",
        }
    }
}

/// Outcome of the identity check.
#[derive(Debug, Clone)]
pub enum IdentityOutcome {
    Fresh(Newness),
    /// Creation time equal or older than the installed artifact.
    Stale,
    /// Installed folder exists but cannot be inspected.
    Unreadable(String),
}

/// Compare a downloaded bundle's embedded metadata against the installed
/// folder for the same logical artifact.
pub fn check(head: &Head, installed_folder: &Path) -> IdentityOutcome {
    if !installed_folder.exists() {
        return IdentityOutcome::Fresh(Newness::Downloaded);
    }
    if std::fs::read_dir(installed_folder).is_err() {
        return IdentityOutcome::Unreadable("no privileges to read folder".to_string());
    }
    let installed = match LocalArtifact::open(installed_folder) {
        Ok(artifact) => artifact,
        Err(e) => return IdentityOutcome::Unreadable(e.to_string()),
    };
    if head.created > installed.create_time() {
        IdentityOutcome::Fresh(Newness::Updated)
    } else {
        IdentityOutcome::Stale
    }
}
