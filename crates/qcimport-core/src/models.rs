use serde::Deserialize;
use std::fmt;
use url::Url;

use crate::error::AppError;

/// Parameters needed to reach one REDCap project: the API endpoint, the
/// project's API token and, for report connections, a report id.
///
/// Deserializes from the parameter store entries, which spell the report
/// id `reportid`.
///
/// # Examples
///
/// ```
/// use qcimport_core::ConnectionParameters;
///
/// let params = ConnectionParameters::new("https://redcap.example.org/api/", "ABC123").unwrap();
/// assert_eq!(params.url().as_str(), "https://redcap.example.org/api/");
/// assert!(!format!("{:?}", params).contains("ABC123"));
/// ```
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct ConnectionParameters {
    url: Url,
    token: String,
    #[serde(default, alias = "reportid")]
    report_id: Option<String>,
}

impl ConnectionParameters {
    /// Builds parameters from a URL string and token.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the URL is malformed or the token is empty.
    pub fn new(url: &str, token: impl Into<String>) -> Result<Self, AppError> {
        let url = Url::parse(url)
            .map_err(|e| AppError::Config(format!("Invalid REDCap URL {}: {}", url, e)))?;
        let params = Self {
            url,
            token: token.into(),
            report_id: None,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn with_report_id(mut self, report_id: impl Into<String>) -> Self {
        self.report_id = Some(report_id.into());
        self
    }

    /// Checks the invariants serde cannot express.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.token.trim().is_empty() {
            return Err(AppError::Config(format!(
                "Empty API token for {}",
                self.url
            )));
        }
        Ok(())
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn report_id(&self) -> Option<&str> {
        self.report_id.as_deref()
    }
}

impl fmt::Debug for ConnectionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParameters")
            .field("url", &self.url.as_str())
            .field("token", &"<redacted>")
            .field("report_id", &self.report_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_bad_url() {
        let result = ConnectionParameters::new("not a url", "token");
        assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("Invalid REDCap URL")));
    }

    #[test]
    fn test_new_rejects_empty_token() {
        let result = ConnectionParameters::new("https://redcap.test/api/", "  ");
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_deserialize_reportid_alias() {
        let params: ConnectionParameters = toml::from_str(
            r#"
            url = "https://redcap.test/api/"
            token = "secret"
            reportid = "42"
            "#,
        )
        .unwrap();
        assert_eq!(params.report_id(), Some("42"));
        assert_eq!(params.token(), "secret");
    }

    #[test]
    fn test_debug_redacts_token() {
        let params = ConnectionParameters::new("https://redcap.test/api/", "secret")
            .unwrap()
            .with_report_id("7");
        let debug = format!("{:?}", params);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("<redacted>"));
        assert!(debug.contains("\"7\""));
    }
}
