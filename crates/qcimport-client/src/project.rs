use async_trait::async_trait;
use qcimport_core::{ApiError, RecordImporter};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::connection::RedcapConnection;

/// Project attributes returned by `content=project`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProjectInfo {
    pub project_id: u64,
    pub project_title: String,
    #[serde(default)]
    pub is_longitudinal: i64,
    #[serde(default)]
    pub has_repeating_instruments_or_events: i64,
    /// Remaining attributes, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One entry of `content=exportFieldNames`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FieldName {
    pub original_field_name: String,
    #[serde(default)]
    pub choice_value: String,
    pub export_field_name: String,
}

/// Short description of a project, logged before a committing run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectSummary {
    pub pid: u64,
    pub title: String,
    pub primary_key: Option<String>,
}

/// Selection for record exports. Empty lists select everything.
#[derive(Debug, Clone, Default)]
pub struct ExportRequest {
    pub records: Vec<String>,
    pub fields: Vec<String>,
    pub forms: Vec<String>,
    pub events: Vec<String>,
    pub filter_logic: Option<String>,
}

impl ExportRequest {
    fn fields(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for (name, values) in [
            ("records", &self.records),
            ("fields", &self.fields),
            ("forms", &self.forms),
            ("events", &self.events),
        ] {
            for (i, value) in values.iter().enumerate() {
                out.push((format!("{}[{}]", name, i), value.clone()));
            }
        }
        if let Some(logic) = &self.filter_logic {
            out.push(("filterLogic".to_string(), logic.clone()));
        }
        out
    }
}

#[derive(Deserialize)]
struct ImportCount {
    #[serde(deserialize_with = "count_value")]
    count: usize,
}

/// REDCap reports the import count as a number or a numeric string.
fn count_value<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Number(usize),
        Text(String),
    }
    match Count::deserialize(deserializer)? {
        Count::Number(n) => Ok(n),
        Count::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Typed operations on one REDCap project.
///
/// Each method issues exactly one API request through the underlying
/// [`RedcapConnection`], except [`RedcapProject::describe`] which issues two.
#[derive(Clone)]
pub struct RedcapProject {
    connection: RedcapConnection,
}

impl RedcapProject {
    pub fn new(connection: RedcapConnection) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &RedcapConnection {
        &self.connection
    }

    pub async fn export_project_info(&self) -> Result<ProjectInfo, ApiError> {
        self.connection
            .request_json(&[("content", "project")], "exporting project info")
            .await
    }

    pub async fn export_field_names(&self) -> Result<Vec<FieldName>, ApiError> {
        self.connection
            .request_json(&[("content", "exportFieldNames")], "exporting field names")
            .await
    }

    /// Exports the data dictionary, limited to `forms` when not empty.
    pub async fn export_metadata(&self, forms: &[&str]) -> Result<Vec<Map<String, Value>>, ApiError> {
        let form_keys: Vec<String> = (0..forms.len()).map(|i| format!("forms[{}]", i)).collect();
        let mut fields = vec![("content", "metadata")];
        fields.extend(form_keys.iter().map(String::as_str).zip(forms.iter().copied()));
        self.connection
            .request_json(&fields, "exporting metadata")
            .await
    }

    /// Exports records in flat JSON form.
    pub async fn export_records(
        &self,
        request: &ExportRequest,
    ) -> Result<Vec<Map<String, Value>>, ApiError> {
        let extra = request.fields();
        let mut fields = vec![("content", "record"), ("type", "flat")];
        fields.extend(extra.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        self.connection
            .request_json(&fields, "exporting records")
            .await
    }

    /// Exports records as the raw CSV body.
    pub async fn export_records_csv(&self, request: &ExportRequest) -> Result<String, ApiError> {
        let extra = request.fields();
        let mut fields = vec![("content", "record"), ("type", "flat"), ("format", "csv")];
        fields.extend(extra.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        self.connection
            .request_text(&fields, "exporting records")
            .await
    }

    /// Imports a JSON array of records and returns the count REDCap reports.
    pub async fn import_records(&self, records: &str) -> Result<usize, ApiError> {
        let response: ImportCount = self
            .connection
            .request_json(
                &[
                    ("content", "record"),
                    ("action", "import"),
                    ("format", "json"),
                    ("type", "flat"),
                    ("overwriteBehavior", "normal"),
                    ("forceAutoNumber", "false"),
                    ("returnContent", "count"),
                    ("data", records),
                ],
                "importing records",
            )
            .await?;
        debug!(count = response.count, "records imported");
        Ok(response.count)
    }

    /// Project id and title, plus the record id field (the first exported field).
    pub async fn describe(&self) -> Result<ProjectSummary, ApiError> {
        let info = self.export_project_info().await?;
        let names = self.export_field_names().await?;
        let summary = ProjectSummary {
            pid: info.project_id,
            title: info.project_title,
            primary_key: names.into_iter().next().map(|f| f.export_field_name),
        };
        info!(pid = summary.pid, title = %summary.title, "connected to REDCap project");
        Ok(summary)
    }
}

#[async_trait]
impl RecordImporter for RedcapProject {
    async fn import_records(&self, records: &str) -> Result<usize, ApiError> {
        RedcapProject::import_records(self, records).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_count_accepts_number_and_string() {
        let n: ImportCount = serde_json::from_str(r#"{"count": 3}"#).unwrap();
        assert_eq!(n.count, 3);
        let s: ImportCount = serde_json::from_str(r#"{"count": "12"}"#).unwrap();
        assert_eq!(s.count, 12);
        assert!(serde_json::from_str::<ImportCount>(r#"{"count": "many"}"#).is_err());
    }

    #[test]
    fn test_export_request_fields() {
        let request = ExportRequest {
            records: vec!["1".into(), "2".into()],
            forms: vec!["a1".into()],
            filter_logic: Some("[age] > 30".into()),
            ..Default::default()
        };
        assert_eq!(
            request.fields(),
            vec![
                ("records[0]".to_string(), "1".to_string()),
                ("records[1]".to_string(), "2".to_string()),
                ("forms[0]".to_string(), "a1".to_string()),
                ("filterLogic".to_string(), "[age] > 30".to_string()),
            ]
        );
    }

    #[test]
    fn test_project_info_keeps_extra_attributes() {
        let info: ProjectInfo = serde_json::from_str(
            r#"{"project_id": 17, "project_title": "QC Checks", "is_longitudinal": 0,
                "has_repeating_instruments_or_events": 0, "purpose": 4}"#,
        )
        .unwrap();
        assert_eq!(info.project_id, 17);
        assert_eq!(info.extra.get("purpose"), Some(&Value::from(4)));
    }
}
