//! Shared presentation helpers: headings and status colors.

use crate::store::Status;
use owo_colors::OwoColorize;

/// Format a section heading with bold/underline.
pub fn format_section_heading(title: &str) -> String {
    format!("{}", title.bold().underline())
}

/// Status label colored by lifecycle stage.
pub fn format_status(status: Status) -> String {
    let label = status.as_str();
    match status {
        Status::Pending => label.yellow().to_string(),
        Status::Processing => label.cyan().to_string(),
        Status::Completed => label.green().to_string(),
        Status::Failed => label.red().to_string(),
    }
}

/// Truncate long free text for table cells.
pub(super) fn ellipsize(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", kept)
}
