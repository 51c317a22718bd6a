//! Record data model
//!
//! A [`Record`] is a document upsert or delete keyed by `docid` inside one
//! tenant ("index code"). Records enter the system through the raw log with
//! an index code and no id; the dealer strips the code (the tenant directory
//! implies it) and assigns a monotonic id.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named text fields of a document
pub type Fields = BTreeMap<String, String>;

/// Numeric scoring variables of a document, keyed by slot number
pub type Variables = BTreeMap<i32, f64>;

/// Category facets of a document
pub type Categories = BTreeMap<String, String>;

/// Maximum length of an index code
pub const MAX_INDEX_CODE_LEN: usize = 128;

/// A single document mutation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    /// Monotonic id, assigned by the dealer. Absent before dealing.
    pub id: Option<u64>,
    /// Tenant the record belongs to. Stripped once dealt into a tenant log.
    pub index_code: Option<String>,
    /// Primary key within a tenant.
    pub docid: Option<String>,
    /// Ingestion time in milliseconds since the epoch.
    pub timestamp_ms: u64,
    /// Tombstone flag.
    pub deleted: bool,
    /// Complete field set (replaced wholesale on update).
    pub fields: Option<Fields>,
    /// Sparse variables (merged key-wise on update).
    pub variables: Option<Variables>,
    /// Sparse categories (merged key-wise on update).
    pub categories: Option<Categories>,
}

impl Record {
    /// Create an empty update for `docid` in tenant `index_code`.
    pub fn new(index_code: impl Into<String>, docid: impl Into<String>) -> Self {
        Record {
            index_code: Some(index_code.into()),
            docid: Some(docid.into()),
            ..Default::default()
        }
    }

    /// Create a bare delete for `docid` in tenant `index_code`.
    pub fn delete(index_code: impl Into<String>, docid: impl Into<String>) -> Self {
        Record {
            deleted: true,
            ..Record::new(index_code, docid)
        }
    }

    /// Set a field (builder style).
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields
            .get_or_insert_with(Fields::new)
            .insert(name.into(), value.into());
        self
    }

    /// Set a variable (builder style).
    pub fn with_variable(mut self, slot: i32, value: f64) -> Self {
        self.variables
            .get_or_insert_with(Variables::new)
            .insert(slot, value);
        self
    }

    /// Set a category (builder style).
    pub fn with_category(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.categories
            .get_or_insert_with(Categories::new)
            .insert(name.into(), value.into());
        self
    }

    /// Whether the record carries any fields, variables or categories.
    pub fn has_payload(&self) -> bool {
        self.fields.is_some() || self.variables.is_some() || self.categories.is_some()
    }

    /// The docid, or an empty string for records without one.
    pub fn docid_str(&self) -> &str {
        self.docid.as_deref().unwrap_or("")
    }

    /// Validate a record arriving on the write path.
    ///
    /// Incoming records must not carry an id and must name a valid tenant.
    pub fn validate_for_write(&self) -> Result<()> {
        if let Some(id) = self.id {
            return Err(Error::invalid_record(format!(
                "record already carries id {}",
                id
            )));
        }
        match &self.index_code {
            Some(code) => validate_index_code(code),
            None => Err(Error::invalid_record("record has no index code")),
        }
    }
}

/// Check that an index code can be used as a tenant directory name.
pub fn validate_index_code(code: &str) -> Result<()> {
    let valid = !code.is_empty()
        && code.len() <= MAX_INDEX_CODE_LEN
        && !code.starts_with('.')
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidIndexCode(code.to_string()))
    }
}

/// Current wall-clock time in milliseconds since the epoch.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
