//! Run summaries: log lines, console text and JSON reports.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{Result, ResultExt};
use crate::types::RunSummary;

/// Log the run outcome, one block per table.
pub fn log_summary(summary: &RunSummary) {
    info!("{}", "=".repeat(80));
    info!("Pipeline finished");
    info!(
        "Succeeded: {}, failed: {}, total time: {:.1}s",
        summary.success_count, summary.failure_count, summary.total_elapsed_seconds
    );

    for result in &summary.results {
        if result.is_success() {
            info!(
                "  OK   {} ({}): {} -> {} rows in {}s",
                result.table_name,
                result.processor,
                result.rows_in.unwrap_or_default(),
                result.rows_out.unwrap_or_default(),
                result.elapsed_seconds
            );
        } else {
            info!(
                "  FAIL {} ({}): {}",
                result.table_name,
                result.processor,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    if summary.success_count > 0 {
        info!("Cleaned tables saved under {}", summary.output_prefix);
    }
    if let Some(after) = &summary.resources_after {
        info!(
            "Memory: {:.1}% -> {:.1}%",
            summary.resources_before.memory_pct, after.memory_pct
        );
    }
    info!(
        "Finished at {}",
        summary.finished_at.format("%Y-%m-%d %H:%M:%S")
    );
}

/// Human-readable summary for the console.
pub fn render_text(summary: &RunSummary) -> String {
    let mut out = String::new();
    let rule = "=".repeat(80);

    // Writing to a String cannot fail.
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "PREPROCESSING COMPLETE");
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(
        out,
        "Mode: {:?}   Succeeded: {}   Failed: {}   Time: {:.1}s",
        summary.mode, summary.success_count, summary.failure_count, summary.total_elapsed_seconds
    );
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{:<30} {:<16} {:<8} {:>12} {:>12} {:>9}",
        "Table", "Processor", "Status", "Rows in", "Rows out", "Time (s)"
    );
    let _ = writeln!(out, "{}", "-".repeat(92));

    for result in &summary.results {
        let rows = |v: Option<usize>| v.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string());
        let status = if result.is_success() { "SUCCESS" } else { "FAILED" };
        let _ = writeln!(
            out,
            "{:<30} {:<16} {:<8} {:>12} {:>12} {:>9.2}",
            result.table_name,
            result.processor,
            status,
            rows(result.rows_in),
            rows(result.rows_out),
            result.elapsed_seconds
        );
        if let Some(error) = &result.error {
            let _ = writeln!(out, "    ! {}", error);
        }
    }

    let _ = writeln!(out);
    if summary.success_count > 0 {
        let _ = writeln!(out, "Output: {}", summary.output_prefix);
    }
    if let Some(after) = &summary.resources_after {
        let _ = writeln!(
            out,
            "Memory: {:.1}% -> {:.1}%",
            summary.resources_before.memory_pct, after.memory_pct
        );
    }
    out
}

/// Pretty JSON for `--json` output.
pub fn to_json(summary: &RunSummary) -> Result<String> {
    Ok(serde_json::to_string_pretty(summary)?)
}

/// Write the JSON report to `<dir>/run_report_<YYYYmmdd_HHMMSS>.json`.
pub fn write_json_report(summary: &RunSummary, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir).context(format!("create {}", dir.display()))?;
    let path = dir.join(format!(
        "run_report_{}.json",
        summary.started_at.format("%Y%m%d_%H%M%S")
    ));
    fs::write(&path, to_json(summary)?).context(format!("write {}", path.display()))?;
    info!("Run report written to {}", path.display());
    Ok(path)
}
