//! Shared styling utilities for terminal output.

use bibsync_core::conflict::ConflictKind;
use console::Style;

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create a header-styled string (bold, white).
pub fn header(msg: &str) -> String {
    let style = Style::new().bold();
    style.apply_to(msg).to_string()
}

/// Create a dim-styled string.
pub fn dim(msg: &str) -> String {
    let style = Style::new().dim();
    style.apply_to(msg).to_string()
}

/// Conflict kind label; deletions stand out in red.
pub fn conflict_kind(kind: ConflictKind) -> String {
    let style = match kind {
        ConflictKind::DeleteModify => Style::new().red().bold(),
        ConflictKind::BothAdded => Style::new().blue().bold(),
        ConflictKind::FieldDisagreement | ConflictKind::KindDisagreement => {
            Style::new().yellow().bold()
        }
    };
    style.apply_to(kind.to_string()).to_string()
}
