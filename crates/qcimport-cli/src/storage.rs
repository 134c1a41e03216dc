//! Local mirror of the QC rules bucket.
//!
//! The mirror keeps the bucket's key layout: the object `CSV/UDS/4.0/I/x.csv`
//! lives at `<root>/CSV/UDS/4.0/I/x.csv`.

use async_trait::async_trait;
use qcimport_core::{AppError, CheckFileRef, CheckSource};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const CSV_DIR: &str = "CSV";

/// [`CheckSource`] reading check files from a directory tree.
#[derive(Debug, Clone)]
pub struct LocalCheckSource {
    root: PathBuf,
    label: String,
}

impl LocalCheckSource {
    pub fn new(root: impl Into<PathBuf>, bucket: &str) -> Self {
        Self {
            root: root.into(),
            label: format!("s3://{}", bucket),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let segments: Option<Vec<&str>> = relative.iter().map(|s| s.to_str()).collect();
        Some(segments?.join("/"))
    }
}

#[async_trait]
impl CheckSource for LocalCheckSource {
    fn label(&self) -> &str {
        &self.label
    }

    async fn list_modules(&self) -> Result<BTreeSet<String>, AppError> {
        let dir = self.root.join(CSV_DIR);
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| AppError::storage(format!("listing {}/ in {}", CSV_DIR, self.label), e))?;

        let mut modules = BTreeSet::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::storage(format!("listing {}/ in {}", CSV_DIR, self.label), e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if let (true, Some(name)) = (is_dir, entry.file_name().to_str()) {
                modules.insert(name.to_string());
            }
        }
        debug!(count = modules.len(), root = %dir.display(), "listed modules");
        Ok(modules)
    }

    async fn list_keys(&self, module: &str) -> Result<Vec<String>, AppError> {
        let prefix = CheckFileRef::module_prefix(module);
        let listing_error = |e: std::io::Error| {
            AppError::storage(format!("listing {} in {}", prefix, self.label), e)
        };

        let mut keys = Vec::new();
        let mut pending = vec![self.root.join(CSV_DIR).join(module)];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await.map_err(listing_error)?;
            while let Some(entry) = entries.next_entry().await.map_err(listing_error)? {
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(listing_error)?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if path.extension().is_some_and(|ext| ext == "csv") {
                    if let Some(key) = self.key_for(&path) {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();
        debug!(module, count = keys.len(), "listed check files");
        Ok(keys)
    }

    async fn fetch(&self, file: &CheckFileRef) -> Result<Vec<u8>, AppError> {
        let path = file
            .key
            .split('/')
            .fold(self.root.clone(), |path, segment| path.join(segment));
        fs::read(&path)
            .await
            .map_err(|e| AppError::storage(format!("fetching {}/{}", self.label, file.key), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qcimport_core::ErrorKind;
    use tempfile::TempDir;

    fn write(root: &Path, key: &str, content: &str) {
        let path = root.join(key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn mirror() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "CSV/UDS/4.0/I/form_a1_ivp_error_checks_mc.csv", "a");
        write(dir.path(), "CSV/UDS/4.0/F/form_a1_fvp_error_checks_mc.csv", "b");
        write(dir.path(), "CSV/UDS/4.0/I/notes.txt", "ignored");
        write(dir.path(), "CSV/ENROLL/1.0/naccid-enrollment-form_error_checks_mc.csv", "c");
        std::fs::create_dir_all(dir.path().join("CSV/FTLD")).unwrap();
        write(dir.path(), "CSV/README.csv", "not a module");
        dir
    }

    #[tokio::test]
    async fn test_list_modules_returns_directories() {
        let dir = mirror();
        let source = LocalCheckSource::new(dir.path(), "nacc-qc-rules");
        let modules: Vec<String> = source.list_modules().await.unwrap().into_iter().collect();
        assert_eq!(modules, vec!["ENROLL", "FTLD", "UDS"]);
        assert_eq!(source.label(), "s3://nacc-qc-rules");
    }

    #[tokio::test]
    async fn test_list_keys_walks_nested_directories() {
        let dir = mirror();
        let source = LocalCheckSource::new(dir.path(), "nacc-qc-rules");
        let keys = source.list_keys("UDS").await.unwrap();
        assert_eq!(
            keys,
            vec![
                "CSV/UDS/4.0/F/form_a1_fvp_error_checks_mc.csv",
                "CSV/UDS/4.0/I/form_a1_ivp_error_checks_mc.csv",
            ]
        );
        assert!(source.list_keys("FTLD").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_reads_content() {
        let dir = mirror();
        let source = LocalCheckSource::new(dir.path(), "nacc-qc-rules");
        let files = source.list_check_files("ENROLL").await.unwrap();
        let file = files[0].as_ref().unwrap();
        assert_eq!(file.form_name, "enrl");
        assert_eq!(source.fetch(file).await.unwrap(), b"c");
    }

    #[tokio::test]
    async fn test_missing_root_is_a_storage_error() {
        let dir = TempDir::new().unwrap();
        let source = LocalCheckSource::new(dir.path().join("missing"), "nacc-qc-rules");
        let err = source.list_modules().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);

        let err = source.list_keys("UDS").await.unwrap_err();
        assert!(err.to_string().contains("CSV/UDS/"));
    }
}
