use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

use crate::check_csv::REQUIRED_HEADERS;
use crate::{ApiError, AppError, CheckFileRef, CheckSource, RecordImporter};

/// Builds a valid error-check CSV with `rows` checks for `file`.
pub fn error_check_csv(file: &CheckFileRef, rows: usize) -> String {
    let headers: Vec<&str> = REQUIRED_HEADERS
        .iter()
        .copied()
        .filter(|h| *h != "packet" || file.packet.is_some())
        .collect();
    let visit = file.visit_type().unwrap_or("ivp");

    let mut csv = headers.join(",");
    csv.push('\n');
    for i in 1..=rows {
        let code = format!("{}-{}-m-{:03}", file.form_name, visit, i);
        let var = format!("VAR{}", i);
        for (col, header) in headers.iter().enumerate() {
            if col > 0 {
                csv.push(',');
            }
            let value = match *header {
                "error_code" => code.clone(),
                "error_type" => "Error".to_string(),
                "form_name" => file.form_name.clone(),
                "packet" => file.packet.clone().unwrap_or_default(),
                "var_name" => var.clone(),
                "check_type" => "Missingness".to_string(),
                "test_name" => format!("{} must be present", var),
                "short_desc" => format!("{} cannot be blank", var),
                "full_desc" => format!("Q{}. {} cannot be blank", i, var),
                "test_logic" => format!("If {} = blank", var),
                _ => String::new(),
            };
            csv.push_str(&value);
        }
        csv.push('\n');
    }
    csv
}

/// In-memory check source for testing, keyed by storage key.
pub struct InMemoryCheckSource {
    label: String,
    files: BTreeMap<String, Vec<u8>>,
    extra_modules: BTreeSet<String>,
    failing_fetches: HashSet<String>,
    failing_lists: HashSet<String>,
    failing_module_listing: bool,
}

impl InMemoryCheckSource {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            files: BTreeMap::new(),
            extra_modules: BTreeSet::new(),
            failing_fetches: HashSet::new(),
            failing_lists: HashSet::new(),
            failing_module_listing: false,
        }
    }

    /// Adds a valid check file with `rows` checks.
    pub fn add_valid(&mut self, key: &str, rows: usize) {
        let file = CheckFileRef::parse(key).expect("test key must be well formed");
        let content = error_check_csv(&file, rows);
        self.files.insert(key.to_string(), content.into_bytes());
    }

    pub fn add_raw(&mut self, key: &str, content: Vec<u8>) {
        self.files.insert(key.to_string(), content);
    }

    /// Adds a module with no files.
    pub fn add_module(&mut self, module: &str) {
        self.extra_modules.insert(module.to_string());
    }

    pub fn fail_fetch(&mut self, key: &str) {
        self.failing_fetches.insert(key.to_string());
    }

    pub fn fail_list(&mut self, module: &str) {
        self.failing_lists.insert(module.to_string());
    }

    /// Makes `list_modules` fail with a storage error.
    pub fn fail_list_modules(&mut self) {
        self.failing_module_listing = true;
    }
}

#[async_trait::async_trait]
impl CheckSource for InMemoryCheckSource {
    fn label(&self) -> &str {
        &self.label
    }

    async fn list_modules(&self) -> Result<BTreeSet<String>, AppError> {
        if self.failing_module_listing {
            return Err(AppError::storage(
                "listing CSV/",
                std::io::Error::other("access denied"),
            ));
        }
        let mut modules = self.extra_modules.clone();
        modules.extend(
            self.files
                .keys()
                .filter_map(|key| key.split('/').nth(1))
                .map(str::to_string),
        );
        Ok(modules)
    }

    async fn list_keys(&self, module: &str) -> Result<Vec<String>, AppError> {
        if self.failing_lists.contains(module) {
            return Err(AppError::storage(
                format!("listing {}", CheckFileRef::module_prefix(module)),
                std::io::Error::other("access denied"),
            ));
        }
        let prefix = CheckFileRef::module_prefix(module);
        Ok(self
            .files
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .cloned()
            .collect())
    }

    async fn fetch(&self, file: &CheckFileRef) -> Result<Vec<u8>, AppError> {
        if self.failing_fetches.contains(&file.key) {
            return Err(AppError::storage(
                format!("fetching {}", file.key),
                std::io::Error::other("access denied"),
            ));
        }
        self.files.get(&file.key).cloned().ok_or_else(|| AppError::Storage {
            message: format!("no such key: {}", file.key),
            source: None,
        })
    }
}

/// Record importer that accepts everything except scripted calls.
///
/// Successful calls report as many records as the payload holds.
#[derive(Default)]
pub struct ScriptedImporter {
    failures: HashMap<usize, (u16, String)>,
    payloads: Mutex<Vec<String>>,
}

impl ScriptedImporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the `call`-th import (1-based) fail with an HTTP error.
    pub fn fail_on_call(mut self, call: usize, status: u16, message: &str) -> Self {
        self.failures.insert(call, (status, message.to_string()));
        self
    }

    pub fn call_count(&self) -> usize {
        self.payloads.lock().expect("payload log poisoned").len()
    }

    pub fn payloads(&self) -> Vec<String> {
        self.payloads.lock().expect("payload log poisoned").clone()
    }
}

#[async_trait::async_trait]
impl RecordImporter for ScriptedImporter {
    async fn import_records(&self, records: &str) -> Result<usize, ApiError> {
        let call = {
            let mut payloads = self.payloads.lock().expect("payload log poisoned");
            payloads.push(records.to_string());
            payloads.len()
        };
        if let Some((status, message)) = self.failures.get(&call) {
            return Err(ApiError::http(*status, message.clone()));
        }
        let rows: Vec<serde_json::Value> = serde_json::from_str(records)
            .map_err(|e| ApiError::other("payload is not a JSON array").with_source(e))?;
        Ok(rows.len())
    }
}
