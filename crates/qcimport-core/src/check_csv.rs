//! Reading and validating error-check definition CSVs.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::warn;

use crate::check_key::CheckFileRef;
use crate::error::AppError;

/// Columns imported into REDCap. Any other column in the CSV (`error_no`,
/// `do_in_redcap`, `in_prev_versions`, `questions`, ...) is dropped.
pub const REQUIRED_HEADERS: [&str; 12] = [
    "error_code",
    "error_type",
    "form_name",
    "packet",
    "var_name",
    "check_type",
    "test_name",
    "short_desc",
    "full_desc",
    "test_logic",
    "comp_forms",
    "comp_vars",
];

const ALLOWED_EMPTY_FIELDS: [&str; 2] = ["comp_forms", "comp_vars"];

/// Row errors quoted in a parse error message; the rest are only logged.
const MAX_REPORTED_ROW_ERRORS: usize = 5;

/// One validated error check, serialized as a REDCap record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorCheck {
    pub error_code: String,
    pub error_type: String,
    pub form_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packet: Option<String>,
    pub var_name: String,
    pub check_type: String,
    pub test_name: String,
    pub short_desc: String,
    pub full_desc: String,
    pub test_logic: String,
    pub comp_forms: String,
    pub comp_vars: String,
}

/// Parses and validates the content of one check-definition file.
///
/// Every row must belong to the form (and packet) named by the file's key,
/// and every required field other than `comp_forms`/`comp_vars` must be
/// filled in. A file whose enrollment-style key has no packet may omit the
/// `packet` column.
///
/// # Errors
///
/// Returns `AppError::Parse` if the content is empty, not valid CSV, lacks
/// required headers, has any invalid row, or has no rows at all.
pub fn parse_error_checks(file: &CheckFileRef, content: &[u8]) -> Result<Vec<ErrorCheck>, AppError> {
    if content.iter().all(u8::is_ascii_whitespace) {
        return Err(AppError::Parse(format!("{}: CSV file is empty", file.key)));
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(content);

    let headers = reader
        .headers()
        .map_err(|e| AppError::Parse(format!("{}: {}", file.key, e)))?
        .clone();

    let columns: HashMap<&str, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, name)| (name, i))
        .collect();

    let missing: Vec<&str> = REQUIRED_HEADERS
        .iter()
        .copied()
        .filter(|h| !columns.contains_key(h))
        .filter(|h| !(*h == "packet" && file.packet.is_none()))
        .collect();
    if !missing.is_empty() {
        return Err(AppError::Parse(format!(
            "{}: missing expected headers: {}",
            file.key,
            missing.join(", ")
        )));
    }

    let visit_type = file.visit_type();
    let mut checks = Vec::new();
    let mut row_errors = Vec::new();

    for record in reader.records() {
        let record = record.map_err(|e| AppError::Parse(format!("{}: {}", file.key, e)))?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        let field = |name: &str| columns.get(name).and_then(|&i| record.get(i));
        let value = |name: &str| field(name).unwrap_or_default().to_string();

        let errors_before = row_errors.len();
        for name in REQUIRED_HEADERS {
            if ALLOWED_EMPTY_FIELDS.contains(&name) {
                continue;
            }
            if field(name).is_some_and(str::is_empty) {
                row_errors.push(format!("Row {}: Field {} cannot be empty", line, name));
            }
        }

        let form_name = value("form_name");
        if form_name != file.form_name {
            row_errors.push(format!(
                "Row {}: Field form_name does not match expected form name {}",
                line, file.form_name
            ));
        }

        let error_code = value("error_code");
        if !error_code.starts_with(&file.form_name) {
            row_errors.push(format!(
                "Row {}: Field error_code does not start with expected form name {}",
                line, file.form_name
            ));
        }

        if let Some(expected_packet) = file.packet.as_deref() {
            if let Some(visit) = visit_type.filter(|v| !error_code.contains(v)) {
                row_errors.push(format!(
                    "Row {}: Field error_code does not have expected visit type {}",
                    line, visit
                ));
            }
            if field("packet") != Some(expected_packet) {
                row_errors.push(format!(
                    "Row {}: Field packet does not match expected packet {}",
                    line, expected_packet
                ));
            }
        }

        if row_errors.len() == errors_before {
            checks.push(ErrorCheck {
                error_code,
                error_type: value("error_type"),
                form_name,
                packet: field("packet").map(str::to_string),
                var_name: value("var_name"),
                check_type: value("check_type"),
                test_name: value("test_name"),
                short_desc: value("short_desc"),
                full_desc: value("full_desc"),
                test_logic: value("test_logic"),
                comp_forms: value("comp_forms"),
                comp_vars: value("comp_vars"),
            });
        }
    }

    if !row_errors.is_empty() {
        for error in &row_errors {
            warn!("{}: {}", file.key, error);
        }
        let mut quoted = row_errors
            .iter()
            .take(MAX_REPORTED_ROW_ERRORS)
            .cloned()
            .collect::<Vec<_>>()
            .join("; ");
        if row_errors.len() > MAX_REPORTED_ROW_ERRORS {
            quoted.push_str("; ...");
        }
        return Err(AppError::Parse(format!(
            "{}: {} invalid row(s): {}",
            file.key,
            row_errors.len(),
            quoted
        )));
    }

    if checks.is_empty() {
        return Err(AppError::Parse(format!(
            "No error checks found in {}; invalid file?",
            file.key
        )));
    }

    Ok(checks)
}

/// Serializes validated checks into the JSON payload REDCap imports.
pub fn to_import_payload(checks: &[ErrorCheck]) -> Result<String, AppError> {
    serde_json::to_string(checks).map_err(|e| AppError::Parse(e.to_string()))
}

/// Error codes seen so far in one import run.
#[derive(Debug, Default)]
pub struct ErrorCodeRegistry {
    seen: HashSet<String>,
}

impl ErrorCodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the codes of `checks` and returns those seen in earlier
    /// files, in file order. A code repeated within `checks` is not a
    /// duplicate. All codes are registered even when duplicates are found,
    /// so later files are checked against this file too.
    pub fn register(&mut self, checks: &[ErrorCheck]) -> Vec<String> {
        let mut duplicates: Vec<String> = Vec::new();
        for check in checks {
            if self.seen.contains(&check.error_code) && !duplicates.contains(&check.error_code) {
                duplicates.push(check.error_code.clone());
            }
        }
        self.seen
            .extend(checks.iter().map(|check| check.error_code.clone()));
        duplicates
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
