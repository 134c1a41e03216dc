//! Configuration types for the error-check importer.
//!
//! Runtime settings have hardcoded defaults. Credentials and storage
//! locations live in a TOML profiles file:
//!
//! ```toml
//! [profiles.prod]
//! storage_root = "/srv/object-store"
//!
//! [profiles.prod.parameters."/redcap/aws/qcchecks"]
//! url = "https://redcap.example.org/api/"
//! token = "..."
//! ```

use serde::Deserialize;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::AppError;
use crate::models::ConnectionParameters;

/// Environment variable overriding the profiles file location.
pub const CONFIG_ENV_VAR: &str = "QCIMPORT_CONFIG";

/// Default bucket holding the error-check CSVs.
pub const DEFAULT_BUCKET: &str = "nacc-qc-rules";

/// Default parameter path of the QC checks REDCap project.
pub const DEFAULT_PROJECT_PATH: &str = "/redcap/aws/qcchecks";

/// REDCap enforces its API quota per token.
const DEFAULT_REQUESTS_PER_SECOND: NonZeroU32 = NonZeroU32::new(20).unwrap();

/// HTTP client configuration for REDCap API calls.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub requests_per_second: NonZeroU32,
    /// Permits that may be spent back to back before pacing kicks in.
    pub burst: NonZeroU32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            burst: NonZeroU32::MIN,
        }
    }
}

/// One named profile: where the object-store mirror lives and which
/// REDCap credentials are available under which parameter paths.
#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub storage_root: PathBuf,
    #[serde(default)]
    pub parameters: HashMap<String, ConnectionParameters>,
}

impl Profile {
    /// Looks up the connection parameters stored at `path`.
    ///
    /// Trailing slashes are ignored on both sides, so `/redcap/aws/qcchecks/`
    /// and `/redcap/aws/qcchecks` name the same entry.
    pub fn connection_parameters(&self, path: &str) -> Result<&ConnectionParameters, AppError> {
        let wanted = normalize_parameter_path(path);
        let params = self
            .parameters
            .iter()
            .find(|(key, _)| normalize_parameter_path(key) == wanted)
            .map(|(_, params)| params)
            .ok_or_else(|| {
                AppError::Config(format!("No REDCap parameters stored at {}", path))
            })?;
        params.validate()?;
        Ok(params)
    }

    /// Directory mirroring the contents of `bucket`.
    pub fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.storage_root.join(normalize_bucket(bucket))
    }
}

/// Root of the profiles TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfilesConfig {
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl ProfilesConfig {
    pub fn profile(&self, name: &str) -> Result<&Profile, AppError> {
        self.profiles.get(name).ok_or_else(|| {
            let mut known: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
            known.sort_unstable();
            AppError::Config(format!(
                "Unknown profile '{}' (configured: {})",
                name,
                if known.is_empty() {
                    "none".to_string()
                } else {
                    known.join(", ")
                }
            ))
        })
    }
}

/// Returns the default profiles file path, `<config dir>/qcimport/profiles.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("qcimport").join("profiles.toml"))
}

/// Loads and parses the profiles file at `path`.
///
/// # Errors
///
/// Returns `AppError::Config` if the file cannot be read or is not valid TOML.
pub fn load_profiles_config(path: &Path) -> Result<ProfilesConfig, AppError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        AppError::Config(format!("Cannot read config file {}: {}", path.display(), e))
    })?;
    toml::from_str(&content)
        .map_err(|e| AppError::Config(format!("Invalid config file {}: {}", path.display(), e)))
}

/// Strips an `s3://` scheme and trailing slashes from a bucket argument.
pub fn normalize_bucket(bucket: &str) -> &str {
    bucket
        .strip_prefix("s3://")
        .unwrap_or(bucket)
        .trim_end_matches('/')
}

fn normalize_parameter_path(path: &str) -> &str {
    path.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[profiles.dev]
storage_root = "/data/mirror"

[profiles.dev.parameters."/redcap/aws/qcchecks/"]
url = "https://redcap.test/api/"
token = "dev-token"

[profiles.dev.parameters."/redcap/aws/empty"]
url = "https://redcap.test/api/"
token = ""
"#;

    #[test]
    fn test_http_config_defaults() {
        let config = HttpConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.requests_per_second.get(), 20);
        assert_eq!(config.burst.get(), 1);
    }

    #[test]
    fn test_parameter_lookup_ignores_trailing_slash() {
        let config: ProfilesConfig = toml::from_str(SAMPLE).unwrap();
        let profile = config.profile("dev").unwrap();
        let params = profile.connection_parameters(DEFAULT_PROJECT_PATH).unwrap();
        assert_eq!(params.token(), "dev-token");
    }

    #[test]
    fn test_missing_parameters_is_config_error() {
        let config: ProfilesConfig = toml::from_str(SAMPLE).unwrap();
        let profile = config.profile("dev").unwrap();
        let err = profile.connection_parameters("/redcap/aws/other").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_empty_token_is_config_error() {
        let config: ProfilesConfig = toml::from_str(SAMPLE).unwrap();
        let profile = config.profile("dev").unwrap();
        assert!(profile.connection_parameters("/redcap/aws/empty").is_err());
    }

    #[test]
    fn test_unknown_profile_lists_known() {
        let config: ProfilesConfig = toml::from_str(SAMPLE).unwrap();
        let err = config.profile("prod").unwrap_err();
        assert!(err.to_string().contains("configured: dev"));
    }

    #[test]
    fn test_bucket_root_normalizes_uri() {
        let config: ProfilesConfig = toml::from_str(SAMPLE).unwrap();
        let profile = config.profile("dev").unwrap();
        assert_eq!(
            profile.bucket_root("s3://nacc-qc-rules/"),
            PathBuf::from("/data/mirror/nacc-qc-rules")
        );
    }

    #[test]
    fn test_load_profiles_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = load_profiles_config(file.path()).unwrap();
        assert!(config.profiles.contains_key("dev"));
    }

    #[test]
    fn test_load_profiles_config_missing_file() {
        let err = load_profiles_config(Path::new("/nonexistent/profiles.toml")).unwrap_err();
        assert!(matches!(err, AppError::Config(msg) if msg.contains("Cannot read config file")));
    }
}
