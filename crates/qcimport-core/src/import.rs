//! Bulk import of error-check definition files into REDCap.
//!
//! The orchestrator walks modules in lexical order and each module's files
//! in key order, so an unchanged source always yields the same report and a
//! fail-fast run always stops at the same file.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::{error, info, warn};

use crate::check_csv::{parse_error_checks, to_import_payload, ErrorCheck, ErrorCodeRegistry};
use crate::check_key::{CheckFileRef, KeyError, CSV_PREFIX};
use crate::error::{AppError, ErrorKind};
use crate::source::{CheckSource, RecordImporter};

/// What to do after a file fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    /// Stop the run at the first failed file.
    #[default]
    Abort,
    /// Record the failure and move on to the next file.
    Continue,
}

/// Whether validated checks are sent to REDCap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Apply {
    #[default]
    Commit,
    /// Read and validate everything, import nothing.
    Simulate,
}

/// How keys that do not follow the check-file naming pattern are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPolicy {
    /// Skip them with a warning; they never fail the run.
    #[default]
    Ignore,
    /// Skip them, but count them as failures.
    Fail,
}

/// Failure and apply policy of one import run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportPolicy {
    pub on_failure: OnFailure,
    pub apply: Apply,
    pub malformed: MalformedPolicy,
}

impl ImportPolicy {
    pub fn new(fail_fast: bool, dry_run: bool) -> Self {
        Self {
            on_failure: if fail_fast {
                OnFailure::Abort
            } else {
                OnFailure::Continue
            },
            apply: if dry_run { Apply::Simulate } else { Apply::Commit },
            malformed: MalformedPolicy::Ignore,
        }
    }

    pub fn with_malformed(mut self, malformed: MalformedPolicy) -> Self {
        self.malformed = malformed;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.apply == Apply::Simulate
    }

    pub fn is_fail_fast(&self) -> bool {
        self.on_failure == OnFailure::Abort
    }
}

/// Which modules a run visits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleFilter {
    All,
    Only(BTreeSet<String>),
}

impl ModuleFilter {
    /// Modules to visit, in lexical order, given the modules `available`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming every requested module that is
    /// not available.
    pub fn resolve(&self, available: BTreeSet<String>) -> Result<Vec<String>, AppError> {
        match self {
            ModuleFilter::All => Ok(available.into_iter().collect()),
            ModuleFilter::Only(names) => {
                let unknown: Vec<&str> = names
                    .iter()
                    .filter(|name| !available.contains(*name))
                    .map(String::as_str)
                    .collect();
                if !unknown.is_empty() {
                    return Err(AppError::Config(format!(
                        "Unknown module(s): {} (available: {})",
                        unknown.join(", "),
                        available.into_iter().collect::<Vec<_>>().join(", ")
                    )));
                }
                Ok(names.iter().cloned().collect())
            }
        }
    }
}

impl FromStr for ModuleFilter {
    type Err = AppError;

    /// Parses `all` or a comma-separated list of module names.
    ///
    /// ```
    /// use qcimport_core::ModuleFilter;
    ///
    /// assert_eq!("all".parse::<ModuleFilter>().unwrap(), ModuleFilter::All);
    /// let filter: ModuleFilter = "UDS, FTLD".parse().unwrap();
    /// assert!(matches!(filter, ModuleFilter::Only(m) if m.len() == 2 && m.contains("FTLD")));
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let names: BTreeSet<String> = s
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();

        if names.is_empty() {
            return Err(AppError::Config("Empty module list".to_string()));
        }
        if names.iter().any(|name| name.eq_ignore_ascii_case("all")) {
            if names.len() > 1 {
                return Err(AppError::Config(format!(
                    "'all' cannot be combined with module names: {}",
                    s
                )));
            }
            return Ok(ModuleFilter::All);
        }
        Ok(ModuleFilter::Only(names))
    }
}

/// Report-friendly copy of an [`AppError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureDetail {
    pub kind: ErrorKind,
    pub message: String,
    pub http_status: Option<u16>,
}

impl From<&AppError> for FailureDetail {
    fn from(err: &AppError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            http_status: err.http_status(),
        }
    }
}

impl fmt::Display for FailureDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Result of processing one storage key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImportStatus {
    Imported,
    SkippedDryRun,
    SkippedMalformed { reason: String },
    Failed(FailureDetail),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportOutcome {
    pub key: String,
    pub module: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<CheckFileRef>,
    #[serde(flatten)]
    pub status: ImportStatus,
    /// Records imported, or validated when nothing was imported.
    pub rows: usize,
    /// SHA-256 of the fetched content, when it was fetched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl ImportOutcome {
    fn failed(
        key: impl Into<String>,
        module: &str,
        file: Option<&CheckFileRef>,
        digest: Option<String>,
        err: &AppError,
    ) -> Self {
        Self {
            key: key.into(),
            module: module.to_string(),
            file: file.cloned(),
            status: ImportStatus::Failed(err.into()),
            rows: 0,
            digest,
        }
    }

    fn malformed(key: &str, module: &str, err: &KeyError) -> Self {
        Self {
            key: key.to_string(),
            module: module.to_string(),
            file: None,
            status: ImportStatus::SkippedMalformed {
                reason: err.to_string(),
            },
            rows: 0,
            digest: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, ImportStatus::Failed(_))
    }

    /// Whether this outcome fails the run under `policy`.
    pub fn counts_as_failure(&self, policy: &ImportPolicy) -> bool {
        match self.status {
            ImportStatus::Failed(_) => true,
            ImportStatus::SkippedMalformed { .. } => policy.malformed == MalformedPolicy::Fail,
            ImportStatus::Imported | ImportStatus::SkippedDryRun => false,
        }
    }
}

/// Counters over the outcomes of a run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub imported: usize,
    pub skipped_dry_run: usize,
    pub skipped_malformed: usize,
    pub failed: usize,
    pub rows: usize,
}

impl ImportStats {
    /// Records an outcome, incrementing the appropriate counter.
    pub fn record(&mut self, outcome: &ImportOutcome) {
        match outcome.status {
            ImportStatus::Imported => self.imported += 1,
            ImportStatus::SkippedDryRun => self.skipped_dry_run += 1,
            ImportStatus::SkippedMalformed { .. } => self.skipped_malformed += 1,
            ImportStatus::Failed(_) => self.failed += 1,
        }
        self.rows += outcome.rows;
    }

    /// Returns the total number of processed keys.
    pub fn total(&self) -> usize {
        self.imported + self.skipped_dry_run + self.skipped_malformed + self.failed
    }
}

/// Where a fail-fast run stopped and what it never attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbortInfo {
    /// Key of the failure that stopped the run.
    pub after: String,
    /// Keys of the stopped module that were listed but not attempted.
    pub remaining_files: Vec<String>,
    /// Modules never visited.
    pub unvisited_modules: Vec<String>,
}

/// Ordered outcomes of one import run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub source: String,
    pub policy: ImportPolicy,
    pub outcomes: Vec<ImportOutcome>,
    pub stats: ImportStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<AbortInfo>,
    pub success: bool,
}

impl ImportReport {
    fn new(source: &str, policy: ImportPolicy) -> Self {
        Self {
            source: source.to_string(),
            policy,
            outcomes: Vec::new(),
            stats: ImportStats::default(),
            aborted: None,
            success: true,
        }
    }

    /// Adds an outcome. Returns true if the run must stop here.
    fn record(&mut self, outcome: ImportOutcome) -> bool {
        let failure = outcome.counts_as_failure(&self.policy);
        self.stats.record(&outcome);
        self.outcomes.push(outcome);
        if failure {
            self.success = false;
        }
        failure && self.policy.is_fail_fast()
    }

    fn abort(&mut self, remaining_files: Vec<String>, unvisited_modules: Vec<String>) {
        let after = self
            .outcomes
            .last()
            .map(|o| o.key.clone())
            .unwrap_or_default();
        error!(
            "fail-fast: halting after {} ({} file(s) and {} module(s) not attempted)",
            after,
            remaining_files.len(),
            unvisited_modules.len()
        );
        self.aborted = Some(AbortInfo {
            after,
            remaining_files,
            unvisited_modules,
        });
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    /// Keys of the files that failed, in processing order.
    pub fn failed_keys(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.is_failed())
            .map(|o| o.key.as_str())
            .collect()
    }

    /// Process exit code: 0 only for a successful run.
    pub fn exit_code(&self) -> u8 {
        if self.success {
            0
        } else {
            1
        }
    }
}

/// Drives one import run from a [`CheckSource`] into a [`RecordImporter`].
///
/// # Examples
///
/// ```no_run
/// use qcimport_core::{CheckSource, ImportOrchestrator, ImportPolicy, ModuleFilter, RecordImporter};
///
/// # async fn example(source: impl CheckSource, project: impl RecordImporter) -> Result<(), qcimport_core::AppError> {
/// let orchestrator = ImportOrchestrator::new(source, project, ImportPolicy::new(true, false));
/// let report = orchestrator.run(&ModuleFilter::All).await?;
/// println!("{} files imported", report.stats.imported);
/// # Ok(())
/// # }
/// ```
pub struct ImportOrchestrator<S, I> {
    source: S,
    importer: I,
    policy: ImportPolicy,
}

impl<S: CheckSource, I: RecordImporter> ImportOrchestrator<S, I> {
    pub fn new(source: S, importer: I, policy: ImportPolicy) -> Self {
        Self {
            source,
            importer,
            policy,
        }
    }

    pub fn policy(&self) -> &ImportPolicy {
        &self.policy
    }

    /// Runs the import.
    ///
    /// Per-file storage, parse and API failures are captured in the report.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `filter` names a module the source
    /// does not have. Nothing is fetched or imported in that case.
    pub async fn run(&self, filter: &ModuleFilter) -> Result<ImportReport, AppError> {
        info!(
            "Running error check import from {} (fail_fast: {}, dry_run: {})",
            self.source.label(),
            self.policy.is_fail_fast(),
            self.policy.is_dry_run()
        );
        let mut report = ImportReport::new(self.source.label(), self.policy);

        let available = match self.source.list_modules().await {
            Ok(modules) => modules,
            Err(e @ AppError::Config(_)) => return Err(e),
            Err(e) => {
                error!("Failed to list modules in {}: {}", self.source.label(), e);
                let prefix = format!("{}/", CSV_PREFIX);
                if report.record(ImportOutcome::failed(prefix, "", None, None, &e)) {
                    let unvisited = match filter {
                        ModuleFilter::All => Vec::new(),
                        ModuleFilter::Only(names) => names.iter().cloned().collect(),
                    };
                    report.abort(Vec::new(), unvisited);
                }
                return Ok(report);
            }
        };

        let modules = filter.resolve(available)?;
        if modules.is_empty() {
            warn!("No modules found in {}", self.source.label());
        }

        let mut registry = ErrorCodeRegistry::new();

        for (module_idx, module) in modules.iter().enumerate() {
            let unvisited = || modules[module_idx + 1..].to_vec();

            let listings = match self.source.list_check_files(module).await {
                Ok(listings) => listings,
                Err(e) => {
                    error!("Failed to list check files for {}: {}", module, e);
                    let outcome = ImportOutcome::failed(
                        CheckFileRef::module_prefix(module),
                        module,
                        None,
                        None,
                        &e,
                    );
                    if report.record(outcome) {
                        report.abort(Vec::new(), unvisited());
                        return Ok(report);
                    }
                    continue;
                }
            };

            if listings.is_empty() {
                info!("No check files found for module {}", module);
                continue;
            }

            let total = listings.len();
            info!("Module {}: {} check file(s)", module, total);

            for (file_idx, listing) in listings.iter().enumerate() {
                let outcome = match listing {
                    Ok(file) => {
                        info!("[{}/{}] Loading error checks from {}", file_idx + 1, total, file);
                        self.process_file(file, &mut registry).await
                    }
                    Err((key, e)) => {
                        warn!("[{}/{}] Skipping malformed key {}: {}", file_idx + 1, total, key, e);
                        ImportOutcome::malformed(key, module, e)
                    }
                };

                if report.record(outcome) {
                    let remaining = listings[file_idx + 1..]
                        .iter()
                        .map(|listing| match listing {
                            Ok(file) => file.key.clone(),
                            Err((key, _)) => key.clone(),
                        })
                        .collect();
                    report.abort(remaining, unvisited());
                    return Ok(report);
                }
            }
        }

        if report.success {
            info!(
                "Import complete: {} file(s), {} record(s){}",
                report.stats.total(),
                report.stats.rows,
                if self.policy.is_dry_run() { " validated (dry run)" } else { " imported" }
            );
        } else {
            error!(
                "Import finished with {} failed file(s):\n{}",
                report.stats.failed,
                report.failed_keys().join("\n")
            );
        }

        Ok(report)
    }

    async fn process_file(
        &self,
        file: &CheckFileRef,
        registry: &mut ErrorCodeRegistry,
    ) -> ImportOutcome {
        let content = match self.source.fetch(file).await {
            Ok(content) => content,
            Err(e) => {
                error!("Failed to fetch {}: {}", file, e);
                return ImportOutcome::failed(&file.key, &file.module, Some(file), None, &e);
            }
        };
        let digest = content_digest(&content);

        let checks = match validate(file, &content, registry) {
            Ok(checks) => checks,
            Err(e) => {
                error!("Errors encountered while reading from {}: {}", file, e);
                return ImportOutcome::failed(&file.key, &file.module, Some(file), Some(digest), &e);
            }
        };

        let outcome = |status, rows| ImportOutcome {
            key: file.key.clone(),
            module: file.module.clone(),
            file: Some(file.clone()),
            status,
            rows,
            digest: Some(digest.clone()),
        };

        if self.policy.is_dry_run() {
            info!("DRY RUN: skipping import of {} error check(s) from {}", checks.len(), file);
            return outcome(ImportStatus::SkippedDryRun, checks.len());
        }

        let imported = match to_import_payload(&checks) {
            Ok(payload) => self
                .importer
                .import_records(&payload)
                .await
                .map_err(AppError::from),
            Err(e) => Err(e),
        };

        match imported {
            Ok(count) => {
                info!("Imported {} records from {}", count, file);
                outcome(ImportStatus::Imported, count)
            }
            Err(e) => {
                error!("Failed to import {}: {}", file, e);
                outcome(ImportStatus::Failed((&e).into()), 0)
            }
        }
    }
}

fn validate(
    file: &CheckFileRef,
    content: &[u8],
    registry: &mut ErrorCodeRegistry,
) -> Result<Vec<ErrorCheck>, AppError> {
    let checks = parse_error_checks(file, content)?;
    let duplicates = registry.register(&checks);
    if !duplicates.is_empty() {
        return Err(AppError::Parse(format!(
            "{}: duplicated error codes, will not import file: {}",
            file.key,
            duplicates.join(", ")
        )));
    }
    Ok(checks)
}

fn content_digest(content: &[u8]) -> String {
    format!("{:x}", Sha256::digest(content))
}
