//! Data-quality heuristics applied before a record is committed

use super::record::{NoticeRecord, RawItem, RecordError};

pub const DEFAULT_CRITICAL_FIELDS: [&str; 5] = [
    "budget_amount",
    "base_price",
    "opening_date",
    "pre_qualification",
    "contract_bond",
];
pub const DEFAULT_MISSING_THRESHOLD: usize = 4;
pub const DEFAULT_NOTE_FIELD: &str = "notes";
pub const DEFAULT_VALIDATION_FIELD: &str = "opening_date";

/// Rejects records whose critical fields are mostly empty
#[derive(Debug, Clone)]
pub struct QualityGate {
    critical_fields: Vec<String>,
    missing_threshold: usize,
    note_field: String,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self::new(
            DEFAULT_CRITICAL_FIELDS.iter().map(|s| (*s).to_string()).collect(),
            DEFAULT_MISSING_THRESHOLD,
            DEFAULT_NOTE_FIELD.to_string(),
        )
    }
}

impl QualityGate {
    pub fn new(critical_fields: Vec<String>, missing_threshold: usize, note_field: String) -> Self {
        Self {
            critical_fields,
            missing_threshold,
            note_field,
        }
    }

    pub fn empty_fields(&self, record: &NoticeRecord) -> Vec<String> {
        self.critical_fields
            .iter()
            .filter(|field| record.field_text(field).is_none())
            .cloned()
            .collect()
    }

    /// A note (e.g. "cancelled") explains missing data and lets the record through.
    pub fn check(&self, record: &NoticeRecord) -> Result<(), RecordError> {
        let empty_fields = self.empty_fields(record);
        let has_note = record.field_text(&self.note_field).is_some();
        if empty_fields.len() >= self.missing_threshold && !has_note {
            return Err(RecordError::QualityGateRejected {
                missing: empty_fields.len(),
                checked: self.critical_fields.len(),
                empty_fields,
            });
        }
        Ok(())
    }
}

/// Detail content must carry the designated date-like field, otherwise the
/// page was most likely captured half-rendered.
pub fn validate_detail(item: &RawItem, field: &str) -> Result<(), RecordError> {
    if item.text(field).is_some() {
        Ok(())
    } else {
        Err(RecordError::ValidationGateRejected {
            field: field.to_string(),
            item_id: item.item_id(),
        })
    }
}
