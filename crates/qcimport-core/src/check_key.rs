//! Storage keys of error-check definition files.
//!
//! Keys have the form
//!
//! ```text
//! CSV/<MODULE>/<FORM_VER>/<PACKET>/form_<FORM_NAME>_<PACKET>_error_checks_<TYPE>.csv
//! ```
//!
//! except for modules without packets (enrollment), which drop the packet
//! segment:
//!
//! ```text
//! CSV/ENROLL/<FORM_VER>/naccid-enrollment-form_error_checks_<TYPE>.csv
//! ```

use serde::Serialize;
use std::fmt;

/// Top-level prefix of every check-file key.
pub const CSV_PREFIX: &str = "CSV";

const ERROR_CHECKS_MARKER: &str = "error_checks";
const ENROLLMENT_MODULE: &str = "ENROLL";
const ENROLLMENT_FORM: &str = "enrl";

/// Reason a storage key could not be turned into a [`CheckFileRef`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("Expected CSV at top level of key {0}")]
    NotCsvRoot(String),

    #[error("Cannot parse error check components from {0}; expected CSV/MODULE/FORM_VER/PACKET/filename")]
    Layout(String),

    #[error("{0} is not an error checks file")]
    NotErrorChecks(String),

    #[error("Cannot determine form name from {0}")]
    FormName(String),
}

/// One importable error-check definition file.
///
/// Ordering is by storage key, which is the natural path order of the
/// files within a module.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CheckFileRef {
    pub key: String,
    pub module: String,
    pub form_version: String,
    pub packet: Option<String>,
    pub form_name: String,
    pub check_type: Option<String>,
}

impl CheckFileRef {
    /// Parses a storage key.
    ///
    /// # Examples
    ///
    /// ```
    /// use qcimport_core::CheckFileRef;
    ///
    /// let file = CheckFileRef::parse("CSV/UDS/4.0/I4/form_a1_i4vp_error_checks_mc.csv").unwrap();
    /// assert_eq!(file.module, "UDS");
    /// assert_eq!(file.packet.as_deref(), Some("I4"));
    /// assert_eq!(file.form_name, "a1");
    /// assert_eq!(file.check_type.as_deref(), Some("mc"));
    /// assert_eq!(file.visit_type(), Some("i4vp"));
    /// ```
    pub fn parse(key: &str) -> Result<Self, KeyError> {
        let parts: Vec<&str> = key.split('/').collect();
        if parts.first() != Some(&CSV_PREFIX) {
            return Err(KeyError::NotCsvRoot(key.to_string()));
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(KeyError::Layout(key.to_string()));
        }

        let (module, form_version, packet, filename) = match parts.as_slice() {
            [_, module, version, packet, filename] => (*module, *version, Some(*packet), *filename),
            [_, module, version, filename] => (*module, *version, None, *filename),
            _ => return Err(KeyError::Layout(key.to_string())),
        };

        let stem = filename
            .strip_suffix(".csv")
            .filter(|stem| stem.contains(ERROR_CHECKS_MARKER))
            .ok_or_else(|| KeyError::NotErrorChecks(key.to_string()))?;

        let form_name = if packet.is_none() && module == ENROLLMENT_MODULE {
            ENROLLMENT_FORM.to_string()
        } else {
            form_name_from(stem, module).ok_or_else(|| KeyError::FormName(key.to_string()))?
        };

        let check_type = stem
            .rsplit_once(ERROR_CHECKS_MARKER)
            .map(|(_, suffix)| suffix.trim_start_matches('_'))
            .filter(|suffix| !suffix.is_empty())
            .map(str::to_string);

        Ok(Self {
            key: key.to_string(),
            module: module.to_string(),
            form_version: form_version.to_string(),
            packet: packet.map(str::to_string),
            form_name,
            check_type,
        })
    }

    /// Visit type implied by the packet: `I4` is `i4vp`, follow-up packets
    /// (`F*`) are `fvp`, everything else is an initial visit `ivp`.
    pub fn visit_type(&self) -> Option<&'static str> {
        let packet = self.packet.as_deref()?;
        Some(if packet == "I4" {
            "i4vp"
        } else if packet.starts_with('F') {
            "fvp"
        } else {
            "ivp"
        })
    }

    /// Key prefix under which all files of `module` live.
    pub fn module_prefix(module: &str) -> String {
        format!("{}/{}/", CSV_PREFIX, module)
    }
}

impl fmt::Display for CheckFileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// `form_<name>_...`: the token after `form_`. The shared header form is
/// qualified by its module.
fn form_name_from(stem: &str, module: &str) -> Option<String> {
    let name = stem.strip_prefix("form_")?.split('_').next()?;
    // `form_error_checks_*` has no form token at all
    if name.is_empty() || name == "error" {
        return None;
    }
    if name == "header" {
        return Some(format!("{}_header", module.to_lowercase()));
    }
    Some(name.to_string())
}
