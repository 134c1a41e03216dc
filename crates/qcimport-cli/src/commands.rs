use qcimport_client::{RateLimiter, RedcapConnection, RedcapProject};
use qcimport_core::config::normalize_bucket;
use qcimport_core::{
    default_config_path, load_profiles_config, AppError, CheckSource, HttpConfig,
    ImportOrchestrator, ImportReport, ProfilesConfig,
};
use std::path::Path;
use tracing::{info, warn};

use crate::config::ErrorChecksArgs;
use crate::storage::LocalCheckSource;

/// Loads the profiles file from `path`, or from the default location.
pub fn load_profiles(path: Option<&Path>) -> Result<ProfilesConfig, AppError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path().ok_or_else(|| {
            AppError::Config(
                "Cannot determine the config directory; pass --config".to_string(),
            )
        })?,
    };
    info!("Loading profiles from {}", path.display());
    load_profiles_config(&path)
}

/// `import error-checks`: loads the rules bucket mirror into the QC checks project.
///
/// Credentials and module names are checked before anything is sent to REDCap.
pub async fn import_error_checks(
    profiles: &ProfilesConfig,
    args: &ErrorChecksArgs,
    http: &HttpConfig,
) -> Result<ImportReport, AppError> {
    let profile = profiles.profile(&args.profile)?;
    let params = profile
        .connection_parameters(&args.redcap_project_path)?
        .clone();

    let bucket = normalize_bucket(&args.bucket);
    let source = LocalCheckSource::new(profile.bucket_root(bucket), bucket);

    let limiter = RateLimiter::shared(http);
    let connection = RedcapConnection::new(params, limiter, http)?;
    let project = RedcapProject::new(connection);

    let policy = args.policy();
    if !policy.is_dry_run() {
        // A listing failure is left for the run to report per module.
        if let Ok(available) = source.list_modules().await {
            args.modules.resolve(available)?;
        }
        match project.describe().await {
            Ok(summary) => info!(
                "Importing into REDCap project {} ({})",
                summary.pid, summary.title
            ),
            Err(e) => warn!("Could not read project info for {}: {}", args.redcap_project_path, e),
        }
    }

    ImportOrchestrator::new(source, project, policy)
        .run(&args.modules)
        .await
}
