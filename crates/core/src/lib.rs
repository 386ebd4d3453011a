//! Correlator archive ingestion, post-solve orchestration and data center
//! delivery.
//!
//! The pipeline: poll a correlator archive endpoint, install new session
//! bundles into the managed vgosDB repository exactly once, run the external
//! wrapper-tool chain over each installed artifact, optionally run an
//! unattended nuSolve analysis, and deliver derived products to the primary
//! data center with a pending queue and submission ledger backing the
//! never-silently-dropped guarantee.

pub mod artifact;
pub mod autosolve;
pub mod bundle;
pub mod config;
pub mod controller;
pub mod delivery;
pub mod endpoint;
pub mod identity;
pub mod installer;
pub mod metrics;
pub mod notify;
pub mod registry;
pub mod stages;
pub mod testing;

pub use artifact::{ArtifactError, LocalArtifact};
pub use autosolve::{AutoOutcome, AutoSolveChain, AutoSolveError};
pub use bundle::{parse_db_name, repository_folder, Bundle, BundleError, Head, SessionKind};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, EndpointConfig,
    Protocol,
};
pub use controller::{IngestController, IngestError, IngestOutcome};
pub use delivery::{
    DeliveryEngine, DeliveryError, DeliveryReceipt, LedgerError, NewSubmission, SqliteLedger,
    SubmissionLedger, SubmissionRecord, SubmissionStatus,
};
pub use endpoint::{
    build_endpoint, ArchiveEndpoint, EndpointError, FtpEndpoint, HttpEndpoint, Listing,
    ListingParserKind, RemoteEntry, RemoteFile, UploadStrategy,
};
pub use identity::{IdentityOutcome, Newness};
pub use installer::{install, rename_aside, InstallError};
pub use notify::{
    Mailer, MailError, NoopMailer, Notifier, PlainReportBuilder, ReportBuilder, TracingNotifier,
};
pub use registry::{HolderInfo, MatchField, RegistryError, SessionRegistry};
pub use stages::{resolve_steps, ProcessingStep, StageError, StageReport, StageRunner};
