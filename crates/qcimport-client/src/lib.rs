//! qcimport client - rate-limited access to the REDCap API.
//!
//! - [`RateLimiter`] is the token bucket shared by every connection using
//!   one API token.
//! - [`RedcapConnection`] authenticates, paces and classifies single requests.
//! - [`RedcapProject`] exposes the typed project operations the importer
//!   needs, including record import.

pub mod connection;
pub mod project;
pub mod rate_limit;

pub use connection::{ApiResponse, Expect, RedcapConnection, RequestBody};
pub use project::{ExportRequest, FieldName, ProjectInfo, ProjectSummary, RedcapProject};
pub use rate_limit::RateLimiter;
