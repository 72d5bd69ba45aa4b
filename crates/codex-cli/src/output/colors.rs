//! ANSI color helpers for terminal output

use colored::Colorize;
use codex_core::ContentSide;
use codex_indexer::{Escalation, Severity};

/// Get colored content side indicator
pub fn colored_side(side: ContentSide) -> String {
    match side {
        ContentSide::Source => "source".cyan().to_string(),
        ContentSide::Target => "target".green().to_string(),
    }
}

/// Get colored severity
pub fn colored_severity(severity: Severity) -> String {
    match severity {
        Severity::Info => "info".blue().to_string(),
        Severity::Warning => "warning".yellow().to_string(),
        Severity::Error => "error".red().to_string(),
        Severity::Critical => "critical".red().bold().to_string(),
    }
}

/// Get colored escalation advice
pub fn colored_escalation(escalation: Escalation) -> String {
    match escalation {
        Escalation::None => success("Index is healthy"),
        Escalation::Informational => success("All issues were repaired"),
        Escalation::OfferResync => warning("Unrepaired issues remain (run: codex-index sync)"),
        Escalation::OfferRebuild => error("Index needs a rebuild (run: codex-index rebuild)"),
    }
}

/// Get colored cell id
pub fn colored_cell(cell_id: &str) -> String {
    cell_id.cyan().bold().to_string()
}

/// Get colored file path
pub fn colored_path(path: &str) -> String {
    path.white().dimmed().to_string()
}

/// Get colored header
pub fn header(text: &str) -> String {
    text.bold().underline().to_string()
}

/// Get colored label
pub fn label(text: &str) -> String {
    text.white().dimmed().to_string()
}

/// Get colored value
pub fn value(text: &str) -> String {
    text.white().to_string()
}

/// Get colored success message
pub fn success(text: &str) -> String {
    format!("{} {}", "✓".green(), text)
}

/// Get colored warning message
pub fn warning(text: &str) -> String {
    format!("{} {}", "⚠".yellow(), text)
}

/// Get colored error message
pub fn error(text: &str) -> String {
    format!("{} {}", "✗".red(), text)
}

/// Format size in human-readable form
pub fn format_size(bytes: u64) -> String {
    let bytes = bytes as f64;
    if bytes < 1024.0 {
        format!("{:.0} B", bytes)
    } else if bytes < 1024.0 * 1024.0 {
        format!("{:.1} KB", bytes / 1024.0)
    } else if bytes < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.1} MB", bytes / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format count with comma separators
pub fn format_count(n: i64) -> String {
    let s = n.to_string();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", s.as_str()),
    };
    let chars: Vec<char> = digits.chars().collect();
    let mut result = String::from(sign);

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }

    result
}
