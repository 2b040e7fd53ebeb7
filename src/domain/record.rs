//! Harvested record model
//!
//! `RawItem` is the open field map produced by the extractor. `NoticeRecord` is the
//! validated structured record the sinks receive; it is built through
//! `NoticeRecord::try_from_raw`, which can fail with a typed `RecordError`.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Field names the orchestration core relies on
pub mod fields {
    pub const ITEM_ID: &str = "bid_notice_number";
    pub const NAME: &str = "bid_notice_name";
    pub const AGENCY: &str = "announcement_agency";
    pub const NEEDS_DETAIL: &str = "has_detail";
    pub const DETAIL_LINK: &str = "detail_link";
    pub const NOTES: &str = "notes";
    pub const ATTACHED_FILES: &str = "attached_files";
    pub const ADDITIONAL_INFO: &str = "additional_info";
}

const UNKNOWN: &str = "Unknown";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("Required field '{field}' is missing or empty")]
    RequiredFieldMissing { field: String },

    #[error("Field '{field}' has an unexpected shape: {reason}")]
    MalformedField { field: String, reason: String },

    #[error(
        "Too many missing fields ({missing}/{checked} critical fields empty). Treating as failure for retry."
    )]
    QualityGateRejected {
        missing: usize,
        checked: usize,
        empty_fields: Vec<String>,
    },

    #[error("Validation failed: {field} is missing/invalid for {item_id}")]
    ValidationGateRejected { field: String, item_id: String },
}

/// Open-ended field map as produced by the listing/detail extractor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawItem {
    fields: Map<String, Value>,
}

impl RawItem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.fields.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// String view of a scalar field; `None` for missing, null, or blank values.
    pub fn text(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// The item identifier, or `"unknown"` when the extractor did not provide one.
    pub fn item_id(&self) -> String {
        self.text(fields::ITEM_ID)
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Whether a detail view has to be opened to enrich this item.
    pub fn needs_detail_fetch(&self) -> bool {
        let flagged = match self.fields.get(fields::NEEDS_DETAIL) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.trim().to_lowercase().as_str(), "true" | "y" | "yes" | "1"),
            _ => false,
        };
        flagged || self.text(fields::DETAIL_LINK).is_some()
    }

    /// Overlay `other` on top of this item (detail values win).
    pub fn merge(&mut self, other: &RawItem) {
        for (key, value) in &other.fields {
            self.fields.insert(key.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedFile {
    pub filename: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
}

/// A harvested bid notice with explicit optional fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticeRecord {
    // identification
    pub bid_notice_number: String,
    pub bid_notice_name: String,
    pub announcement_agency: String,
    pub document_number: Option<String>,

    // dates
    pub announcement_date: Option<String>,
    pub bid_date: Option<String>,
    pub deadline_date: Option<String>,
    pub opening_date: Option<String>,
    pub participation_deadline: Option<String>,

    // classification & method
    pub classification: Option<String>,
    pub bid_method: Option<String>,
    pub selection_method: Option<String>,
    pub bid_system: Option<String>,
    pub is_re_bid: Option<String>,

    // location & money
    pub opening_location: Option<String>,
    pub budget_amount: Option<String>,
    pub base_price: Option<String>,
    pub estimated_price: Option<String>,
    pub pre_qualification: Option<String>,
    pub contract_bond: Option<String>,
    pub bid_bond: Option<String>,

    // contact
    pub contact_person: Option<String>,
    pub contact_department: Option<String>,
    pub phone_number: Option<String>,
    pub email: Option<String>,

    pub demanding_agency: Option<String>,
    pub status: Option<String>,
    pub notes: Option<String>,
    pub detail_link: Option<String>,
    pub source_url: Option<String>,
    pub attached_files: Vec<AttachedFile>,
    pub crawled_at: DateTime<Utc>,

    /// Everything the extractor produced that has no dedicated field
    pub additional_info: BTreeMap<String, Value>,
}

/// Optional text fields mapped one-to-one from the raw item
const TEXT_FIELDS: &[&str] = &[
    "document_number",
    "announcement_date",
    "bid_date",
    "deadline_date",
    "opening_date",
    "participation_deadline",
    "classification",
    "bid_method",
    "selection_method",
    "bid_system",
    "is_re_bid",
    "opening_location",
    "budget_amount",
    "base_price",
    "estimated_price",
    "pre_qualification",
    "contract_bond",
    "bid_bond",
    "contact_person",
    "contact_department",
    "phone_number",
    "email",
    "demanding_agency",
    "status",
    "notes",
    "detail_link",
    "source_url",
];

impl NoticeRecord {
    /// Typed construction step; fails on missing identity fields or malformed values.
    pub fn try_from_raw(raw: &RawItem) -> Result<Self, RecordError> {
        let bid_notice_number = required_text(raw, fields::ITEM_ID)?;
        let bid_notice_name = required_text(raw, fields::NAME)?;
        let announcement_agency = required_text(raw, fields::AGENCY)?;

        let mut text = BTreeMap::new();
        for field in TEXT_FIELDS {
            text.insert(*field, optional_text(raw, field)?);
        }
        let mut take = |field: &str| text.remove(field).flatten();

        let attached_files = match raw.get(fields::ATTACHED_FILES) {
            None | Some(Value::Null) => Vec::new(),
            Some(value @ Value::Array(_)) => serde_json::from_value(value.clone()).map_err(|e| {
                RecordError::MalformedField {
                    field: fields::ATTACHED_FILES.to_string(),
                    reason: e.to_string(),
                }
            })?,
            Some(_) => Vec::new(),
        };

        let mut additional_info = BTreeMap::new();
        if let Some(Value::Object(extra)) = raw.get(fields::ADDITIONAL_INFO) {
            for (key, value) in extra {
                additional_info.insert(key.clone(), value.clone());
            }
        }
        for (key, value) in raw.iter() {
            let known = TEXT_FIELDS.contains(&key.as_str())
                || [
                    fields::ITEM_ID,
                    fields::NAME,
                    fields::AGENCY,
                    fields::NEEDS_DETAIL,
                    fields::ATTACHED_FILES,
                    fields::ADDITIONAL_INFO,
                ]
                .contains(&key.as_str());
            if !known {
                additional_info.insert(key.clone(), value.clone());
            }
        }

        Ok(Self {
            bid_notice_number,
            bid_notice_name,
            announcement_agency,
            document_number: take("document_number"),
            announcement_date: take("announcement_date"),
            bid_date: take("bid_date"),
            deadline_date: take("deadline_date"),
            opening_date: take("opening_date"),
            participation_deadline: take("participation_deadline"),
            classification: take("classification"),
            bid_method: take("bid_method"),
            selection_method: take("selection_method"),
            bid_system: take("bid_system"),
            is_re_bid: take("is_re_bid"),
            opening_location: take("opening_location"),
            budget_amount: take("budget_amount"),
            base_price: take("base_price"),
            estimated_price: take("estimated_price"),
            pre_qualification: take("pre_qualification"),
            contract_bond: take("contract_bond"),
            bid_bond: take("bid_bond"),
            contact_person: take("contact_person"),
            contact_department: take("contact_department"),
            phone_number: take("phone_number"),
            email: take("email"),
            demanding_agency: take("demanding_agency"),
            status: take("status"),
            notes: take("notes"),
            detail_link: take("detail_link"),
            source_url: take("source_url"),
            attached_files,
            crawled_at: Utc::now(),
            additional_info,
        })
    }

    /// Minimal record used when structured construction fails, so nothing is dropped silently.
    pub fn fallback(listing: &RawItem, enriched: &RawItem, error: &RecordError) -> Self {
        let mut additional_info = BTreeMap::new();
        additional_info.insert("raw_data".to_string(), enriched.clone().into_value());
        additional_info.insert("parse_error".to_string(), Value::String(error.to_string()));

        Self {
            bid_notice_number: listing.item_id(),
            bid_notice_name: listing.text(fields::NAME).unwrap_or_else(|| UNKNOWN.to_string()),
            announcement_agency: listing
                .text(fields::AGENCY)
                .unwrap_or_else(|| UNKNOWN.to_string()),
            document_number: None,
            announcement_date: None,
            bid_date: None,
            deadline_date: None,
            opening_date: None,
            participation_deadline: None,
            classification: None,
            bid_method: None,
            selection_method: None,
            bid_system: None,
            is_re_bid: None,
            opening_location: None,
            budget_amount: None,
            base_price: None,
            estimated_price: None,
            pre_qualification: None,
            contract_bond: None,
            bid_bond: None,
            contact_person: None,
            contact_department: None,
            phone_number: None,
            email: None,
            demanding_agency: None,
            status: None,
            notes: None,
            detail_link: None,
            source_url: None,
            attached_files: Vec::new(),
            crawled_at: Utc::now(),
            additional_info,
        }
    }

    /// Look up a field by its serialized name; used by the quality gate.
    pub fn field_text(&self, name: &str) -> Option<&str> {
        let value = match name {
            fields::ITEM_ID => Some(&self.bid_notice_number),
            fields::NAME => Some(&self.bid_notice_name),
            fields::AGENCY => Some(&self.announcement_agency),
            "document_number" => self.document_number.as_ref(),
            "announcement_date" => self.announcement_date.as_ref(),
            "bid_date" => self.bid_date.as_ref(),
            "deadline_date" => self.deadline_date.as_ref(),
            "opening_date" => self.opening_date.as_ref(),
            "participation_deadline" => self.participation_deadline.as_ref(),
            "classification" => self.classification.as_ref(),
            "bid_method" => self.bid_method.as_ref(),
            "selection_method" => self.selection_method.as_ref(),
            "bid_system" => self.bid_system.as_ref(),
            "is_re_bid" => self.is_re_bid.as_ref(),
            "opening_location" => self.opening_location.as_ref(),
            "budget_amount" => self.budget_amount.as_ref(),
            "base_price" => self.base_price.as_ref(),
            "estimated_price" => self.estimated_price.as_ref(),
            "pre_qualification" => self.pre_qualification.as_ref(),
            "contract_bond" => self.contract_bond.as_ref(),
            "bid_bond" => self.bid_bond.as_ref(),
            "contact_person" => self.contact_person.as_ref(),
            "contact_department" => self.contact_department.as_ref(),
            "phone_number" => self.phone_number.as_ref(),
            "email" => self.email.as_ref(),
            "demanding_agency" => self.demanding_agency.as_ref(),
            "status" => self.status.as_ref(),
            "notes" => self.notes.as_ref(),
            "detail_link" => self.detail_link.as_ref(),
            "source_url" => self.source_url.as_ref(),
            _ => None,
        };
        value.map(String::as_str).filter(|s| !s.trim().is_empty())
    }

    /// Recency first, then identifier; both descending.
    pub fn output_order(a: &Self, b: &Self) -> Ordering {
        let date_a = a.announcement_date.as_deref().unwrap_or("");
        let date_b = b.announcement_date.as_deref().unwrap_or("");
        date_b
            .cmp(date_a)
            .then_with(|| b.bid_notice_number.cmp(&a.bid_notice_number))
    }
}

fn required_text(raw: &RawItem, field: &str) -> Result<String, RecordError> {
    optional_text(raw, field)?.ok_or_else(|| RecordError::RequiredFieldMissing {
        field: field.to_string(),
    })
}

fn optional_text(raw: &RawItem, field: &str) -> Result<Option<String>, RecordError> {
    match raw.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(RecordError::MalformedField {
            field: field.to_string(),
            reason: format!("expected a scalar, got {}", value_kind(other)),
        }),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// In-memory collection of records harvested during one run
#[derive(Debug, Clone, Default)]
pub struct RecordCollection {
    records: Vec<NoticeRecord>,
}

impl RecordCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: NoticeRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in deterministic output order.
    pub fn sorted(&self) -> Vec<NoticeRecord> {
        let mut records = self.records.clone();
        records.sort_by(NoticeRecord::output_order);
        records
    }
}
