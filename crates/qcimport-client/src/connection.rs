use qcimport_core::{ApiError, ConnectionParameters, HttpConfig};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::rate_limit::RateLimiter;

/// How a successful response body is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    Json,
    Text,
}

/// Body of a REDCap API request. The API token and error format are
/// added by the connection.
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// `application/x-www-form-urlencoded` fields.
    Form(Vec<(String, String)>),
    /// A JSON object.
    Json(Value),
}

impl RequestBody {
    pub fn form(fields: &[(&str, &str)]) -> Self {
        RequestBody::Form(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// Decoded body of a successful response.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    Json(Value),
    Text(String),
}

impl ApiResponse {
    pub fn into_json(self) -> Value {
        match self {
            ApiResponse::Json(value) => value,
            ApiResponse::Text(text) => Value::String(text),
        }
    }

    pub fn into_text(self) -> String {
        match self {
            ApiResponse::Json(value) => value.to_string(),
            ApiResponse::Text(text) => text,
        }
    }
}

/// REDCap error bodies look like `{"error": "..."}` when `returnFormat=json`.
#[derive(serde::Deserialize)]
struct ErrorBody {
    error: String,
}

/// Authenticated, rate-limited connection to one REDCap project.
///
/// Every call takes a permit from the shared [`RateLimiter`] before it is
/// sent and is issued exactly once: nothing is retried here.
///
/// # Examples
///
/// ```no_run
/// use qcimport_client::{RateLimiter, RedcapConnection};
/// use qcimport_core::{ConnectionParameters, HttpConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = HttpConfig::default();
/// let limiter = RateLimiter::shared(&config);
/// let params = ConnectionParameters::new("https://redcap.example.org/api/", "TOKEN")?;
/// let connection = RedcapConnection::new(params, limiter, &config)?;
/// let info: serde_json::Value = connection
///     .request_json(&[("content", "project")], "exporting project info")
///     .await?;
/// println!("{}", info["project_title"]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedcapConnection {
    client: Client,
    params: ConnectionParameters,
    limiter: Arc<RateLimiter>,
    timeout: Duration,
}

impl RedcapConnection {
    /// Creates a connection drawing permits from `limiter`.
    ///
    /// # Errors
    ///
    /// Returns an `ApiError` without status if the HTTP client cannot be built.
    pub fn new(
        params: ConnectionParameters,
        limiter: Arc<RateLimiter>,
        config: &HttpConfig,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .user_agent(concat!("qcimport/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApiError::other("Failed to build HTTP client").with_source(e))?;

        Ok(Self {
            client,
            params,
            limiter,
            timeout: config.timeout,
        })
    }

    pub fn url(&self) -> &Url {
        self.params.url()
    }

    pub fn parameters(&self) -> &ConnectionParameters {
        &self.params
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Sends one request to `path` (relative to the API URL) and decodes
    /// the response.
    ///
    /// 2xx responses are decoded per `expect`. 4xx/5xx responses become an
    /// `ApiError` with the status and the server's error message.
    /// Transport failures (timeout, DNS, refused or reset connections)
    /// become an `ApiError` with no status and the underlying cause.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
        body: RequestBody,
        expect: Expect,
    ) -> Result<ApiResponse, ApiError> {
        let context = format!("{} {}", method, if path.is_empty() { "/" } else { path });
        self.send(method, path, params, body, expect, &context).await
    }

    /// Posts form fields to the API endpoint and decodes the result as JSON.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        fields: &[(&str, &str)],
        context: &str,
    ) -> Result<T, ApiError> {
        let value = self
            .send(Method::POST, "", &[], RequestBody::form(fields), Expect::Json, context)
            .await?
            .into_json();
        serde_json::from_value(value).map_err(|e| {
            ApiError::other(format!("{}: unexpected response shape", context)).with_source(e)
        })
    }

    /// Posts form fields to the API endpoint and returns the raw body.
    pub async fn request_text(&self, fields: &[(&str, &str)], context: &str) -> Result<String, ApiError> {
        Ok(self
            .send(Method::POST, "", &[], RequestBody::form(fields), Expect::Text, context)
            .await?
            .into_text())
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
        body: RequestBody,
        expect: Expect,
        context: &str,
    ) -> Result<ApiResponse, ApiError> {
        let url = self.params.url().join(path).map_err(|e| {
            ApiError::other(format!("{}: invalid API path '{}'", context, path)).with_source(e)
        })?;

        let mut builder = self.client.request(method.clone(), url.clone());
        if !params.is_empty() {
            builder = builder.query(params);
        }
        builder = match body {
            RequestBody::Form(mut fields) => {
                fields.push(("token".to_string(), self.params.token().to_string()));
                fields.push(("returnFormat".to_string(), "json".to_string()));
                if expect == Expect::Json && !fields.iter().any(|(k, _)| k == "format") {
                    fields.push(("format".to_string(), "json".to_string()));
                }
                builder.form(&fields)
            }
            RequestBody::Json(Value::Object(mut object)) => {
                object.insert("token".into(), Value::String(self.params.token().to_string()));
                object.insert("returnFormat".into(), Value::String("json".into()));
                builder.json(&Value::Object(object))
            }
            RequestBody::Json(_) => {
                return Err(ApiError::other(format!(
                    "{}: JSON request body must be an object",
                    context
                )));
            }
        };

        self.limiter.acquire().await;
        debug!(%method, %url, context, "sending REDCap request");

        let response = builder
            .send()
            .await
            .map_err(|e| self.transport_error(context, &url, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.transport_error(context, &url, e))?;

        if !status.is_success() {
            debug!(%url, status = status.as_u16(), "REDCap request failed");
            return Err(ApiError::http(
                status.as_u16(),
                error_message(context, status, &text),
            ));
        }

        match expect {
            Expect::Text => Ok(ApiResponse::Text(text)),
            Expect::Json => serde_json::from_str(&text).map(ApiResponse::Json).map_err(|e| {
                ApiError::other(format!("{}: response is not valid JSON", context)).with_source(e)
            }),
        }
    }

    fn transport_error(&self, context: &str, url: &Url, e: reqwest::Error) -> ApiError {
        let message = if e.is_timeout() {
            format!(
                "{}: request to {} timed out after {} seconds",
                context,
                url,
                self.timeout.as_secs()
            )
        } else if e.is_connect() {
            format!("{}: error connecting to {}", context, url)
        } else {
            format!("{}: request to {} failed", context, url)
        };
        ApiError::transport(message, e)
    }
}

/// `Error: <context>` followed by the status line and the server's message.
fn error_message(context: &str, status: StatusCode, body: &str) -> String {
    let detail = match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error,
        Err(_) if body.trim().is_empty() => "(empty response)".to_string(),
        Err(_) => body.trim().to_string(),
    };
    format!(
        "Error: {}\nHTTP Error: {} {}: {}",
        context,
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown"),
        detail
    )
}
