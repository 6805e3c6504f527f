//! Line-oriented change report.

use std::collections::BTreeSet;

use ava_county_region_models::{ChangeKind, ChangeRecord};
use serde_json::Value;

use crate::GEOMETRY_PROPERTY;

/// Counts over a set of change records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffSummary {
    /// Regions only in the later snapshot.
    pub added: usize,
    /// Regions only in the earlier snapshot.
    pub removed: usize,
    /// Regions present in both with at least one differing property.
    pub changed_regions: usize,
    /// Differing properties across all changed regions.
    pub changed_properties: usize,
}

impl DiffSummary {
    /// Tallies `records`.
    #[must_use]
    pub fn from_records(records: &[ChangeRecord]) -> Self {
        let mut summary = Self::default();
        let mut changed = BTreeSet::new();

        for record in records {
            match record.kind {
                ChangeKind::Added => summary.added += 1,
                ChangeKind::Removed => summary.removed += 1,
                ChangeKind::Changed => {
                    summary.changed_properties += 1;
                    changed.insert(record.region_id.as_str());
                }
            }
        }

        summary.changed_regions = changed.len();
        summary
    }

    /// Whether there are no differences at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0 && self.changed_properties == 0
    }
}

impl std::fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return f.write_str("no differences");
        }
        write!(
            f,
            "{} added, {} removed, {} changed ({} properties)",
            self.added, self.removed, self.changed_regions, self.changed_properties
        )
    }
}

/// Renders one line per record followed by a summary line.
#[must_use]
pub fn render_report(records: &[ChangeRecord]) -> Vec<String> {
    let mut lines: Vec<String> = records.iter().map(render_record).collect();
    lines.push(format!("Diff: {}", DiffSummary::from_records(records)));
    lines
}

/// Writes the report to the log at info level.
pub fn log_report(records: &[ChangeRecord]) {
    for line in render_report(records) {
        log::info!("{line}");
    }
}

fn render_record(record: &ChangeRecord) -> String {
    match record.kind {
        ChangeKind::Added => format!("+ {}", record.region_id),
        ChangeKind::Removed => format!("- {}", record.region_id),
        ChangeKind::Changed => {
            let attribute = record.attribute.as_deref().unwrap_or_default();
            if attribute == GEOMETRY_PROPERTY {
                format!("~ {} {attribute}: coordinates differ", record.region_id)
            } else {
                format!(
                    "~ {} {attribute}: {} -> {}",
                    record.region_id,
                    render_value(record.old.as_ref()),
                    render_value(record.new.as_ref())
                )
            }
        }
    }
}

fn render_value(value: Option<&Value>) -> String {
    value.map_or_else(|| "<absent>".to_string(), Value::to_string)
}
