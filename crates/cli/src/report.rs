//! Tables for merge analyses and conflicts.

use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use bibsync_core::conflict::ThreeWayEntryConflict;
use bibsync_core::merge::MergeAnalysis;
use bibsync_core::model::Record;

use crate::style;

/// One row per identity the plan touches.
pub fn plan_table(analysis: &MergeAnalysis) -> Table {
    let plan = &analysis.plan;
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Key", "Action", "Details"]);

    for (key, patch) in &plan.field_patches {
        let fields: Vec<String> = patch
            .iter()
            .map(|(name, value)| match value {
                Some(_) => name.to_string(),
                None => format!("-{name}"),
            })
            .collect();
        table.add_row(vec![Cell::new(key), Cell::new("patch"), Cell::new(fields.join(", "))]);
    }
    for (key, kind) in &plan.kind_patches {
        table.add_row(vec![Cell::new(key), Cell::new("retype"), Cell::new(kind)]);
    }
    for entry in &plan.new_entries {
        table.add_row(vec![
            Cell::new(entry.key().unwrap_or("-")),
            Cell::new("insert"),
            Cell::new(&entry.kind),
        ]);
    }
    for key in &plan.deleted_keys {
        table.add_row(vec![Cell::new(key), Cell::new("delete"), Cell::new("")]);
    }
    table
}

pub fn conflict_table(conflicts: &[ThreeWayEntryConflict]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Key", "Kind", "Fields", "Base", "Local", "Remote"]);

    for c in conflicts {
        let fields: Vec<&str> = c.fields.iter().map(|f| f.as_str()).collect();
        table.add_row(vec![
            Cell::new(&c.key),
            Cell::new(style::conflict_kind(c.kind)),
            Cell::new(fields.join(", ")),
            Cell::new(describe(c.base.as_ref(), c)),
            Cell::new(describe(c.local.as_ref(), c)),
            Cell::new(describe(c.remote.as_ref(), c)),
        ]);
    }
    table
}

/// The conflicting fields of one version, or its presence.
fn describe(record: Option<&Record>, conflict: &ThreeWayEntryConflict) -> String {
    let Some(record) = record else {
        return "(absent)".to_string();
    };
    if conflict.fields.is_empty() {
        return format!("@{}", record.kind);
    }
    conflict
        .fields
        .iter()
        .map(|name| format!("{name}={}", truncate(record.get(name).unwrap_or("-"), 30)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

pub fn print_summary(analysis: &MergeAnalysis) {
    let plan = &analysis.plan;
    println!("{}", style::header("Merge analysis"));
    println!("  Field patches : {}", plan.field_patches.len());
    println!("  Type changes  : {}", plan.kind_patches.len());
    println!("  New entries   : {}", plan.new_entries.len());
    println!("  Deletions     : {}", plan.deleted_keys.len());
    println!("  Conflicts     : {}", analysis.conflicts.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use bibsync_core::conflict::ConflictKind;

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("short", 30), "short");
        assert_eq!(truncate("ééééééééé", 6), "ééé...");
    }

    #[test]
    fn test_describe_versions() {
        let conflict = ThreeWayEntryConflict {
            key: "k".into(),
            kind: ConflictKind::FieldDisagreement,
            base: Some(Record::with_key("article", "k").field("title", "A")),
            local: Some(Record::with_key("article", "k").field("title", "C")),
            remote: None,
            fields: vec!["title".into()],
        };
        assert_eq!(describe(conflict.local.as_ref(), &conflict), "title=C");
        assert_eq!(describe(None, &conflict), "(absent)");
    }

    #[test]
    fn test_plan_table_rows() {
        let mut analysis = MergeAnalysis::default();
        analysis.plan.deleted_keys.insert("gone".into());
        analysis
            .plan
            .new_entries
            .push(Record::with_key("book", "fresh"));
        let rendered = plan_table(&analysis).to_string();
        assert!(rendered.contains("gone"));
        assert!(rendered.contains("fresh"));
        assert!(rendered.contains("insert"));
    }
}
