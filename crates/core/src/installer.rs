//! Artifact installation.
//!
//! Replacement is rename-aside-then-extract, never in-place mutation: an
//! existing folder moves to the first free `.p1`..`.p9` suffix, then the
//! bundle unpacks into a staging sibling that is renamed into place. A failed
//! extraction leaves no partial target.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::bundle::{Bundle, BundleError};

/// Bounded history of superseded folder versions.
const MAX_HISTORY: u32 = 9;

/// Error type for installation.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("no free rename suffix for {0} (.p1 through .p9 all taken)")]
    HistoryFull(PathBuf),

    #[error("could not move {folder} aside: {source}")]
    RenameAside {
        folder: PathBuf,
        source: std::io::Error,
    },

    #[error("extraction failed: {0}")]
    Extract(#[from] BundleError),

    #[error("could not move extracted artifact into {target}: {source}")]
    Commit {
        target: PathBuf,
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Move an existing folder to the first free `.p1`..`.p9` suffix.
/// Returns the new location, or `None` when the folder did not exist.
pub fn rename_aside(folder: &Path) -> Result<Option<PathBuf>, InstallError> {
    if !folder.exists() {
        return Ok(None);
    }
    for index in 1..=MAX_HISTORY {
        let candidate = PathBuf::from(format!("{}.p{index}", folder.display()));
        if candidate.is_dir() {
            continue;
        }
        std::fs::rename(folder, &candidate).map_err(|source| InstallError::RenameAside {
            folder: folder.to_path_buf(),
            source,
        })?;
        debug!(from = %folder.display(), to = %candidate.display(), "superseded folder moved aside");
        return Ok(Some(candidate));
    }
    Err(InstallError::HistoryFull(folder.to_path_buf()))
}

/// Install a downloaded bundle at `target`, preserving any previous version
/// under a renamed path. Not retried on failure; the caller owns removal of
/// the downloaded temp file either way.
pub fn install(bundle: &Bundle, target: &Path) -> Result<(), InstallError> {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    rename_aside(target)?;
    if target.exists() {
        return Err(InstallError::RenameAside {
            folder: target.to_path_buf(),
            source: std::io::Error::other("folder still present after rename"),
        });
    }

    let staging = parent.join(format!(".{}.part-{}", bundle.db_name(), Uuid::new_v4()));
    let extracted = match bundle.extract_into(&staging) {
        Ok(extracted) => extracted,
        Err(e) => {
            cleanup(&staging);
            return Err(e.into());
        }
    };

    if let Err(source) = std::fs::rename(&extracted, target) {
        cleanup(&staging);
        return Err(InstallError::Commit {
            target: target.to_path_buf(),
            source,
        });
    }
    cleanup(&staging);
    Ok(())
}

fn cleanup(staging: &Path) {
    if staging.exists() {
        if let Err(e) = std::fs::remove_dir_all(staging) {
            warn!(path = %staging.display(), error = %e, "could not remove staging folder");
        }
    }
}
