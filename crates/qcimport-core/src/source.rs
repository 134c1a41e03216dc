use std::collections::BTreeSet;
use std::sync::Arc;

use crate::check_key::{CheckFileRef, KeyError};
use crate::error::{ApiError, AppError};

/// A listed storage key: either a well-formed check file or a key that does
/// not follow the check-file naming pattern.
pub type CheckListing = Result<CheckFileRef, (String, KeyError)>;

/// Storage holding the error-check definition files, organized as
/// `CSV/<MODULE>/<FORM_VER>/[<PACKET>/]<file>.csv`.
///
/// Failures are reported as `AppError::Storage`.
#[async_trait::async_trait]
pub trait CheckSource: Send + Sync {
    /// Human-readable label identifying this source.
    fn label(&self) -> &str;

    /// Names of the modules present under `CSV/`.
    async fn list_modules(&self) -> Result<BTreeSet<String>, AppError>;

    /// Every `.csv` key stored under `CSV/<module>/`.
    async fn list_keys(&self, module: &str) -> Result<Vec<String>, AppError>;

    /// Raw content of one check file.
    async fn fetch(&self, file: &CheckFileRef) -> Result<Vec<u8>, AppError>;

    /// Check files of `module` in key order. Keys that do not parse are
    /// returned as errors alongside the valid ones, in the same order.
    async fn list_check_files(&self, module: &str) -> Result<Vec<CheckListing>, AppError> {
        let mut keys = self.list_keys(module).await?;
        keys.sort();
        keys.dedup();
        Ok(keys
            .into_iter()
            .map(|key| CheckFileRef::parse(&key).map_err(|e| (key, e)))
            .collect())
    }
}

#[async_trait::async_trait]
impl<T: CheckSource + ?Sized> CheckSource for Arc<T> {
    fn label(&self) -> &str {
        (**self).label()
    }

    async fn list_modules(&self) -> Result<BTreeSet<String>, AppError> {
        (**self).list_modules().await
    }

    async fn list_keys(&self, module: &str) -> Result<Vec<String>, AppError> {
        (**self).list_keys(module).await
    }

    async fn fetch(&self, file: &CheckFileRef) -> Result<Vec<u8>, AppError> {
        (**self).fetch(file).await
    }

    async fn list_check_files(&self, module: &str) -> Result<Vec<CheckListing>, AppError> {
        (**self).list_check_files(module).await
    }
}

/// Destination for validated error checks: a REDCap project's record import.
#[async_trait::async_trait]
pub trait RecordImporter: Send + Sync {
    /// Imports a JSON array of records and returns the number REDCap
    /// reports as imported.
    async fn import_records(&self, records: &str) -> Result<usize, ApiError>;
}

#[async_trait::async_trait]
impl<T: RecordImporter + ?Sized> RecordImporter for Arc<T> {
    async fn import_records(&self, records: &str) -> Result<usize, ApiError> {
        (**self).import_records(records).await
    }
}
