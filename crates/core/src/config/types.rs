use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::registry::MatchField;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub repository: RepositoryConfig,
    pub agency: AgencyConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Archive endpoints to ingest from, keyed by center code.
    #[serde(default)]
    pub archive: HashMap<String, EndpointConfig>,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// Ordered wrapper-tool steps run over every installed artifact.
    #[serde(default)]
    pub steps: Vec<StepConfig>,
    /// Unattended analysis options, keyed by session kind. Kinds without an
    /// entry end up in ready-for-review instead.
    #[serde(default)]
    pub auto: HashMap<String, AutoConfig>,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Managed repository layout.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RepositoryConfig {
    /// Root of the vgosDB repository (one `<yyyy>/<db>` folder per artifact).
    pub root: PathBuf,
    /// Session files tree (correlator report snapshots, spool copies).
    pub session_dir: PathBuf,
    /// Scratch area for solve output and spool files.
    pub work_dir: PathBuf,
    /// Remote file names never considered for download.
    #[serde(default)]
    pub reject: Vec<String>,
    #[serde(default = "default_true")]
    pub save_correlator_report: bool,
}

/// Analysis center identity.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgencyConfig {
    /// Agency code stamped into processing records (e.g. `GSFC`).
    pub code: String,
}

/// Interactive session registry (concurrency guard).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_dir")]
    pub dir: PathBuf,
    /// Which holder fields are compared against the incoming artifact.
    #[serde(default = "default_match_on")]
    pub match_on: Vec<MatchField>,
    /// Locks older than this are considered stale and reaped.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            dir: default_registry_dir(),
            match_on: default_match_on(),
            lock_ttl_secs: default_lock_ttl_secs(),
        }
    }
}

fn default_registry_dir() -> PathBuf {
    PathBuf::from("/tmp/vget-sessions")
}

fn default_match_on() -> Vec<MatchField> {
    vec![MatchField::DbName, MatchField::Session, MatchField::Initials]
}

fn default_lock_ttl_secs() -> u64 {
    12 * 3600
}

/// Wire protocol of a remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ftp,
    Ftps,
    Http,
    Https,
}

impl Protocol {
    pub fn is_web(&self) -> bool {
        matches!(self, Protocol::Http | Protocol::Https)
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Ftp => "ftp",
            Protocol::Ftps => "ftps",
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

/// One remote archive or delivery endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    pub protocol: Protocol,
    /// Host name, optionally with port (`ivs.bkg.bund.de:21`).
    pub host: String,
    #[serde(default = "default_root")]
    pub root: String,
    /// Subtree under `root` watched for new bundles.
    #[serde(default)]
    pub scan: String,
    /// Expected remote name template (`{year}/{db_name}.tgz`).
    #[serde(default)]
    pub file_name: String,
    /// Page fetched on connect, in case a login redirect is required.
    #[serde(default)]
    pub first_page: String,
    /// Listing parser key (web endpoints).
    #[serde(default)]
    pub parser: Option<String>,
    /// Upload strategy key (delivery endpoints).
    #[serde(default)]
    pub upload: Option<String>,
    /// Base URL of the upload form, for form-based strategies.
    #[serde(default)]
    pub script: Option<String>,
    /// Endpoint local-time offset applied when decoding listing timestamps.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
    #[serde(default = "default_anonymous")]
    pub username: String,
    #[serde(default = "default_anonymous")]
    pub password: String,
}

/// Delivery engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeliveryConfig {
    /// Code of the primary data center. Unknown codes route everything to
    /// the pending queue.
    #[serde(default)]
    pub primary: String,
    #[serde(default)]
    pub endpoints: HashMap<String, EndpointConfig>,
    #[serde(default = "default_pending_dir")]
    pub pending_dir: PathBuf,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            primary: String::new(),
            endpoints: HashMap::new(),
            pending_dir: default_pending_dir(),
        }
    }
}

fn default_pending_dir() -> PathBuf {
    PathBuf::from("pending-uploads")
}

/// One external wrapper-tool step.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StepConfig {
    pub tool: String,
    /// Explicit executable path. Resolved from `PATH` when absent.
    #[serde(default)]
    pub executable: Option<PathBuf>,
    /// Option string per session kind.
    #[serde(default)]
    pub options: HashMap<String, String>,
    /// Whether the step also runs for VGOS sessions.
    #[serde(default)]
    pub process_vgos: bool,
    /// Completion marker checked in the processing record. Defaults to the
    /// tool name.
    #[serde(default)]
    pub marker: Option<String>,
}

/// Unattended analysis options for one session kind.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AutoConfig {
    /// Solve command template (`{db_name}` substituted).
    pub cmd: String,
    /// Where the spool file is copied (`{db_name}` substituted).
    #[serde(default)]
    pub copy: Option<String>,
    /// Operator initials used for the unattended run.
    pub initials: String,
    /// Identity file supplying the default initials, when present.
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    /// Whether the analyst report and email are produced on success.
    #[serde(default = "default_true")]
    pub analyst: bool,
    #[serde(default)]
    pub actions: Vec<AutoAction>,
    #[serde(default)]
    pub submissions: Vec<AutoSubmission>,
}

/// One post-solve action.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AutoAction {
    pub name: String,
    /// Command template (`{db_name}` substituted), run through the shell.
    pub command: String,
    #[serde(default = "default_true")]
    pub required: bool,
}

/// One product submission.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AutoSubmission {
    pub name: String,
    /// File path templates (`{db_name}` and `{work_dir}` substituted).
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default = "default_true")]
    pub required: bool,
}

/// Ledger database configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("vget.db")
}

fn default_root() -> String {
    "/pub/vlbi".to_string()
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_anonymous() -> String {
    "anonymous".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal_config() {
        let toml = r#"
[repository]
root = "/data/vgosdb"
session_dir = "/data/sessions"
work_dir = "/data/work"

[agency]
code = "GSFC"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.agency.code, "GSFC");
        assert!(config.archive.is_empty());
        assert!(config.repository.save_correlator_report);
        assert_eq!(config.database.path, PathBuf::from("vget.db"));
    }

    #[test]
    fn test_deserialize_endpoint_table() {
        let toml = r#"
[repository]
root = "/data/vgosdb"
session_dir = "/data/sessions"
work_dir = "/data/work"

[agency]
code = "GSFC"

[archive.cddis]
protocol = "https"
host = "cddis.nasa.gov"
root = "/archive/vlbi"
parser = "generic"
utc_offset_minutes = -300

[archive.wash]
protocol = "ftp"
host = "ivsopar.obspm.fr"
file_name = "{year}/{db_name}.tgz"

[delivery]
primary = "cddis"

[delivery.endpoints.cddis]
protocol = "https"
host = "depot.cddis.eosdis.nasa.gov"
upload = "cddis"
script = "https://depot.cddis.eosdis.nasa.gov/CDDIS_FileUpload/"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.archive.len(), 2);
        let cddis = &config.archive["cddis"];
        assert_eq!(cddis.protocol, Protocol::Https);
        assert_eq!(cddis.utc_offset_minutes, -300);
        assert_eq!(config.archive["wash"].timeout_secs, 5);
        assert_eq!(config.delivery.primary, "cddis");
        assert_eq!(
            config.delivery.endpoints["cddis"].upload.as_deref(),
            Some("cddis")
        );
    }

    #[test]
    fn test_deserialize_steps_and_auto() {
        let toml = r#"
[repository]
root = "/data/vgosdb"
session_dir = "/data/sessions"
work_dir = "/data/work"

[agency]
code = "GSFC"

[[steps]]
tool = "vgosDbCalc"
process_vgos = true

[steps.options]
standard = "-a"
intensive = "-i"

[auto.intensive]
cmd = "nuSolve -a -q {db_name}"
initials = "WD"

[[auto.intensive.actions]]
name = "EOPM"
command = "aps-eopm {db_name}"

[[auto.intensive.submissions]]
name = "EOPI"
files = ["{work_dir}/{db_name}.eopi.gz"]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.steps.len(), 1);
        assert_eq!(config.steps[0].options["standard"], "-a");
        assert!(config.steps[0].process_vgos);
        let auto = &config.auto["intensive"];
        assert_eq!(auto.initials, "WD");
        assert!(auto.analyst);
        assert!(auto.actions[0].required);
        assert_eq!(auto.submissions[0].files.len(), 1);
    }
}
