//! Human-readable output formatting

use super::colors::*;
use codex_db::SearchHit;
use codex_indexer::{SyncCheck, SyncReport, ValidationIssue, ValidationReport};

/// Format the result of a sync status check
pub fn format_sync_check(check: &SyncCheck) -> String {
    let mut lines = Vec::new();

    lines.push(format!(
        "  {}: {}",
        label("Needs sync"),
        value(&format_count(check.needs_sync.len() as i64))
    ));
    lines.push(format!(
        "  {}: {}",
        label("Unchanged"),
        value(&format_count(check.unchanged.len() as i64))
    ));

    for path in &check.needs_sync {
        let reason = check
            .details
            .get(path)
            .map(|d| d.reason.as_str())
            .unwrap_or("unknown");
        lines.push(format!("    {} ({})", colored_path(path), reason));
    }

    for failure in &check.errors {
        lines.push(format!("    {}: {}", error(&failure.path), failure.error));
    }

    lines.join("\n")
}

/// Format a sync or rebuild report
pub fn format_sync_report(report: &SyncReport) -> String {
    let mut lines = Vec::new();

    lines.push(format!(
        "  {}: {}",
        label("Files"),
        value(&format_count(report.total_files as i64))
    ));
    lines.push(format!(
        "  {}: {}",
        label("Synced"),
        value(&format_count(report.synced_files as i64))
    ));
    lines.push(format!(
        "  {}: {}",
        label("Unchanged"),
        value(&format_count(report.unchanged_files as i64))
    ));
    if report.removed_files > 0 || report.removed_metadata > 0 {
        lines.push(format!(
            "  {}: {} files, {} sync records",
            label("Removed"),
            report.removed_files,
            report.removed_metadata
        ));
    }
    lines.push(format!(
        "  {}: {} ms",
        label("Duration"),
        report.duration_ms
    ));

    for failure in &report.errors {
        lines.push(format!("  {}: {}", error(&failure.path), failure.error));
    }

    lines.push(String::new());
    if report.cancelled {
        lines.push(warning("Sync cancelled; committed files are kept"));
    } else if report.errors.is_empty() {
        lines.push(success("Sync complete"));
    } else {
        lines.push(warning(&format!(
            "Sync finished with {} failed files",
            report.errors.len()
        )));
    }

    lines.join("\n")
}

/// Format one validation issue
pub fn format_issue(issue: &ValidationIssue) -> String {
    let mut line = format!(
        "  [{}] {}: {}",
        colored_severity(issue.severity),
        issue.kind.as_str(),
        issue.message
    );
    if let Some(path) = &issue.path {
        line.push_str(&format!(" {}", colored_path(path)));
    }
    if issue.repaired {
        line.push_str(" (repaired)");
    }
    line
}

/// Format a validation report
pub fn format_validation_report(report: &ValidationReport) -> String {
    let mut lines = Vec::new();

    lines.push(header(&format!("Validation ({})", report.tier)));
    lines.push(String::new());
    if report.skipped {
        lines.push(warning("Sync verification is disabled by configuration"));
        return lines.join("\n");
    }

    lines.push(format!(
        "  {}: {}",
        label("Files checked"),
        value(&format_count(report.files_checked as i64))
    ));
    lines.push(format!(
        "  {}: {} ms",
        label("Duration"),
        report.duration_ms
    ));
    if !report.issues.is_empty() {
        lines.push(String::new());
        lines.extend(report.issues.iter().map(format_issue));
    }

    lines.push(String::new());
    lines.push(colored_escalation(report.escalation()));
    lines.join("\n")
}

/// Format a search hit
pub fn format_hit(hit: &SearchHit) -> String {
    format!(
        "{} [{}] {}",
        colored_cell(&hit.cell_id),
        colored_side(hit.content_type),
        hit.snippet
    )
}
