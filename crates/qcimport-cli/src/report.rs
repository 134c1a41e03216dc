use qcimport_core::{ImportReport, ImportStatus};
use std::fmt::Write;

use crate::config::OutputFormat;

/// Renders `report` for stdout.
pub fn render(report: &ImportReport, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Text => Ok(render_text(report)),
        OutputFormat::Json => {
            let mut json = serde_json::to_string_pretty(report)?;
            json.push('\n');
            Ok(json)
        }
    }
}

fn status_label(status: &ImportStatus) -> &'static str {
    match status {
        ImportStatus::Imported => "imported",
        ImportStatus::SkippedDryRun => "dry-run",
        ImportStatus::SkippedMalformed { .. } => "malformed",
        ImportStatus::Failed(_) => "FAILED",
    }
}

/// Plain-text table: one line per outcome, details indented below it.
pub fn render_text(report: &ImportReport) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail.
    let _ = write_text(&mut out, report);
    out
}

fn write_text(out: &mut String, report: &ImportReport) -> std::fmt::Result {
    writeln!(
        out,
        "Error check import from {} (fail_fast: {}, dry_run: {})",
        report.source,
        report.policy.is_fail_fast(),
        report.policy.is_dry_run()
    )?;
    writeln!(out)?;

    if report.outcomes.is_empty() {
        writeln!(out, "No check files processed.")?;
    } else {
        writeln!(out, "{:<10} {:>6}  {:<12}  KEY", "STATUS", "ROWS", "SHA256")?;
        for outcome in &report.outcomes {
            let digest = outcome.digest.as_deref().map(|d| &d[..d.len().min(12)]);
            writeln!(
                out,
                "{:<10} {:>6}  {:<12}  {}",
                status_label(&outcome.status),
                outcome.rows,
                digest.unwrap_or("-"),
                outcome.key
            )?;
            match &outcome.status {
                ImportStatus::Failed(detail) => {
                    for line in detail.to_string().lines() {
                        writeln!(out, "           {}", line)?;
                    }
                }
                ImportStatus::SkippedMalformed { reason } => {
                    writeln!(out, "           {}", reason)?;
                }
                ImportStatus::Imported | ImportStatus::SkippedDryRun => {}
            }
        }
    }

    let stats = &report.stats;
    writeln!(out)?;
    writeln!(
        out,
        "Summary: {} imported, {} dry-run, {} malformed, {} failed, {} record(s)",
        stats.imported, stats.skipped_dry_run, stats.skipped_malformed, stats.failed, stats.rows
    )?;

    if let Some(abort) = &report.aborted {
        writeln!(
            out,
            "Aborted after {}: {} file(s) and {} module(s) not attempted",
            abort.after,
            abort.remaining_files.len(),
            abort.unvisited_modules.len()
        )?;
        for key in &abort.remaining_files {
            writeln!(out, "  not attempted: {}", key)?;
        }
        if !abort.unvisited_modules.is_empty() {
            writeln!(out, "  modules not visited: {}", abort.unvisited_modules.join(", "))?;
        }
    }

    writeln!(out, "Result: {}", if report.success { "SUCCESS" } else { "FAILURE" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use qcimport_core::test_support::{InMemoryCheckSource, ScriptedImporter};
    use qcimport_core::{ImportOrchestrator, ImportPolicy, ModuleFilter};

    async fn sample_report(fail_fast: bool, dry_run: bool) -> ImportReport {
        let mut source = InMemoryCheckSource::new("s3://nacc-qc-rules");
        source.add_valid("CSV/FTLD/3.0/I/form_b9_ivp_error_checks_mc.csv", 2);
        source.add_valid("CSV/UDS/4.0/I/form_a1_ivp_error_checks_mc.csv", 3);
        source.add_raw("CSV/UDS/4.0/I/form_a1_ivp_checks.csv", b"x".to_vec());
        let importer = ScriptedImporter::new().fail_on_call(1, 422, "Error: importing records");
        ImportOrchestrator::new(source, importer, ImportPolicy::new(fail_fast, dry_run))
            .run(&ModuleFilter::All)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_text_report_for_aborted_run() {
        let report = sample_report(true, false).await;
        let text = render_text(&report);

        assert!(text.starts_with("Error check import from s3://nacc-qc-rules (fail_fast: true"));
        assert!(text.contains("FAILED"));
        assert!(text.contains("[api] API error: Error: importing records (HTTP 422)"));
        assert!(text.contains("Aborted after CSV/FTLD/3.0/I/form_b9_ivp_error_checks_mc.csv"));
        assert!(text.contains("modules not visited: UDS"));
        assert!(text.ends_with("Result: FAILURE\n"));
    }

    #[tokio::test]
    async fn test_text_report_for_dry_run() {
        let report = sample_report(false, true).await;
        let text = render_text(&report);

        assert!(text.contains("Summary: 0 imported, 2 dry-run, 1 malformed, 0 failed, 5 record(s)"));
        assert!(text.contains("malformed"));
        assert!(!text.contains("Aborted"));
        assert!(text.ends_with("Result: SUCCESS\n"));
    }

    #[tokio::test]
    async fn test_dry_run_reports_render_identically() {
        let first = render(&sample_report(true, true).await, OutputFormat::Json).unwrap();
        let second = render(&sample_report(true, true).await, OutputFormat::Json).unwrap();
        assert_eq!(first, second);

        let value: serde_json::Value = serde_json::from_str(&first).unwrap();
        assert_eq!(value["success"], serde_json::json!(true));
        assert_eq!(value["outcomes"][0]["status"], serde_json::json!("skipped_dry_run"));
        assert_eq!(value["outcomes"][0]["digest"].as_str().map(str::len), Some(64));
    }
}
