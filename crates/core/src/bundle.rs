//! Session bundle handling.
//!
//! A session bundle is the gzip-compressed tar produced by a correlator for
//! one observing session. All entries live under a single top-level directory
//! named after the database (e.g. `24JAN02XE/...`), and the entry
//! `<db>/Head.json` carries the metadata that identifies the bundle: session
//! code, creation time and session kind. The creation time is readable by
//! scanning tar entries without extracting anything to disk.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

/// Error type for bundle operations.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("I/O error reading bundle: {0}")]
    Io(#[from] std::io::Error),

    #[error("bundle {0} has no Head.json entry")]
    MissingHead(String),

    #[error("invalid Head.json in bundle {name}: {reason}")]
    InvalidHead { name: String, reason: String },
}

/// Session kind, driving stage selection and auto-analysis routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Standard,
    Intensive,
    Vgos,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Standard => "standard",
            SessionKind::Intensive => "intensive",
            SessionKind::Vgos => "vgos",
        }
    }
}

/// Embedded bundle metadata (`Head.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Head {
    /// Session code from the observing schedule (e.g. `r41141`).
    pub session: String,
    /// Creation time stamped by the correlator.
    pub created: DateTime<Utc>,
    /// Session kind.
    pub kind: SessionKind,
}

static DB_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{2}[A-Z]{3}\d{2}[A-Z]{2}$").expect("db name regex"));

/// Extract the database name from a remote file name, stripping any
/// compression suffixes. Returns `None` when the stem is not a valid
/// database name.
pub fn parse_db_name(file_name: &str) -> Option<String> {
    let stem = file_name
        .split('/')
        .next_back()?
        .trim_end_matches(".tgz")
        .trim_end_matches(".gz")
        .trim_end_matches(".tar");
    if DB_NAME.is_match(stem) {
        Some(stem.to_string())
    } else {
        None
    }
}

/// Four digit year encoded in the first two characters of a database name.
/// Two digit years below 50 belong to the 2000s.
pub fn db_year(db_name: &str) -> Option<i32> {
    let yy: i32 = db_name.get(0..2)?.parse().ok()?;
    Some(if yy < 50 { 2000 + yy } else { 1900 + yy })
}

/// Repository folder for a database name: `<root>/<yyyy>/<db>`.
pub fn repository_folder(root: &Path, db_name: &str) -> PathBuf {
    match db_year(db_name) {
        Some(year) => root.join(year.to_string()).join(db_name),
        None => root.join(db_name),
    }
}

/// Render an endpoint's `file_name` template for a database name and compare
/// the basename against an observed remote name. Templates use `{db_name}`
/// and `{year}` placeholders.
pub fn matches_file_name_template(template: &str, db_name: &str, observed: &str) -> bool {
    let year = db_year(db_name)
        .map(|y| y.to_string())
        .unwrap_or_default();
    let rendered = template
        .replace("{db_name}", db_name)
        .replace("{year}", &year);
    let expected = rendered.split('/').next_back().unwrap_or(&rendered);
    let observed = observed.split('/').next_back().unwrap_or(observed);
    expected == observed
}

/// A downloaded session bundle sitting in a temporary location.
pub struct Bundle {
    db_name: String,
    path: PathBuf,
}

impl Bundle {
    pub fn new(db_name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            db_name: db_name.into(),
            path: path.into(),
        }
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the embedded `Head.json` by scanning tar entries, without
    /// extracting the bundle.
    pub fn head(&self) -> Result<Head, BundleError> {
        let file = File::open(&self.path)?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        for entry in archive.entries()? {
            let mut entry = entry?;
            let is_head = entry
                .path()?
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n == "Head.json")
                .unwrap_or(false);
            if !is_head {
                continue;
            }
            let mut buf = String::new();
            entry.read_to_string(&mut buf)?;
            return serde_json::from_str(&buf).map_err(|e| BundleError::InvalidHead {
                name: self.db_name.clone(),
                reason: e.to_string(),
            });
        }
        Err(BundleError::MissingHead(self.db_name.clone()))
    }

    /// Unpack the bundle into `staging`. Entries keep their `<db>/` prefix,
    /// so the extracted artifact lands at `staging/<db>`.
    pub fn extract_into(&self, staging: &Path) -> Result<PathBuf, BundleError> {
        std::fs::create_dir_all(staging)?;
        let file = File::open(&self.path)?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        archive.unpack(staging)?;
        let extracted = staging.join(&self.db_name);
        if !extracted.is_dir() {
            return Err(BundleError::MissingHead(self.db_name.clone()));
        }
        Ok(extracted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::write_test_bundle;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_parse_db_name() {
        assert_eq!(parse_db_name("24JAN02XE.tgz"), Some("24JAN02XE".to_string()));
        assert_eq!(
            parse_db_name("/pub/vlbi/2024/24JAN02XE.tar.gz"),
            Some("24JAN02XE".to_string())
        );
        assert_eq!(parse_db_name("notes.txt"), None);
        assert_eq!(parse_db_name("24jan02xe.tgz"), None);
    }

    #[test]
    fn test_db_year() {
        assert_eq!(db_year("24JAN02XE"), Some(2024));
        assert_eq!(db_year("99DEC31XA"), Some(1999));
        assert_eq!(db_year("XXJAN02XE"), None);
    }

    #[test]
    fn test_repository_folder() {
        let folder = repository_folder(Path::new("/data/vgosdb"), "24JAN02XE");
        assert_eq!(folder, PathBuf::from("/data/vgosdb/2024/24JAN02XE"));
    }

    #[test]
    fn test_file_name_template() {
        assert!(matches_file_name_template(
            "{year}/{db_name}.tgz",
            "24JAN02XE",
            "24JAN02XE.tgz"
        ));
        assert!(!matches_file_name_template(
            "{year}/{db_name}.tgz",
            "24JAN02XE",
            "24JAN02XE_v2.tgz"
        ));
    }

    #[test]
    fn test_head_round_trip() {
        let tmp = TempDir::new().unwrap();
        let created = Utc.with_ymd_and_hms(2024, 1, 3, 10, 30, 0).unwrap();
        let path = write_test_bundle(tmp.path(), "24JAN02XE", "r41141", created, &[]);

        let bundle = Bundle::new("24JAN02XE", &path);
        let head = bundle.head().unwrap();
        assert_eq!(head.session, "r41141");
        assert_eq!(head.created, created);
        assert_eq!(head.kind, SessionKind::Standard);
    }

    #[test]
    fn test_missing_head() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty.tgz");
        let file = File::create(&path).unwrap();
        let enc = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let builder = tar::Builder::new(enc);
        let enc = builder.into_inner().unwrap();
        enc.finish().unwrap();

        let bundle = Bundle::new("24JAN02XE", &path);
        assert!(matches!(bundle.head(), Err(BundleError::MissingHead(_))));
    }

    #[test]
    fn test_extract_into() {
        let tmp = TempDir::new().unwrap();
        let created = Utc.with_ymd_and_hms(2024, 1, 3, 10, 30, 0).unwrap();
        let path = write_test_bundle(
            tmp.path(),
            "24JAN02XE",
            "r41141",
            created,
            &[("Observables/data.nc", b"obs")],
        );

        let bundle = Bundle::new("24JAN02XE", &path);
        let staging = tmp.path().join("staging");
        let extracted = bundle.extract_into(&staging).unwrap();
        assert!(extracted.join("Head.json").is_file());
        assert!(extracted.join("Observables/data.nc").is_file());
    }
}
