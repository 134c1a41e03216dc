//! qcimport core - error model, configuration, check-file parsing and the
//! import orchestrator.

pub mod check_csv;
pub mod check_key;
pub mod config;
pub mod error;
pub mod import;
pub mod models;
pub mod source;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use check_csv::{parse_error_checks, ErrorCheck, ErrorCodeRegistry, REQUIRED_HEADERS};
pub use check_key::{CheckFileRef, KeyError};
pub use config::{
    default_config_path, load_profiles_config, HttpConfig, Profile, ProfilesConfig,
    DEFAULT_BUCKET, DEFAULT_PROJECT_PATH,
};
pub use error::{ApiError, AppError, ErrorKind};
pub use import::{
    AbortInfo, Apply, FailureDetail, ImportOrchestrator, ImportOutcome, ImportPolicy,
    ImportReport, ImportStats, ImportStatus, MalformedPolicy, ModuleFilter, OnFailure,
};
pub use models::ConnectionParameters;
pub use source::{CheckListing, CheckSource, RecordImporter};
