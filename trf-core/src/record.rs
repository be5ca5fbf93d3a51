use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Source tag attached to fields written by a human reviewer.
pub const MANUAL_REVIEW_SOURCE: &str = "manual-review";

/// A typed field value. Enum members are carried as `Text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Date(NaiveDate),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => write!(f, "{}", s),
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

/// One extracted field value with its provenance. Never mutated after
/// creation; a correction is a new `ExtractedField`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField {
    pub name: String,
    pub value: FieldValue,
    /// Extraction reliability in [0, 1].
    pub confidence: f64,
    /// Identifier of the originating document, or `manual-review`.
    pub source: String,
}

impl ExtractedField {
    pub fn new(name: impl Into<String>, value: FieldValue, confidence: f64, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value,
            confidence: confidence.clamp(0.0, 1.0),
            source: source.into(),
        }
    }

    /// A field written by a human reviewer: full confidence, manual source.
    pub fn manual(name: impl Into<String>, value: FieldValue) -> Self {
        Self::new(name, value, 1.0, MANUAL_REVIEW_SOURCE)
    }
}

/// Per-document lifecycle stage. Transitions are strictly forward;
/// `Failed` is a parallel terminal state reachable from any stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Uploaded,
    OcrDone,
    Extracted,
    Validated,
    Merged,
    Reviewed,
    Failed,
}

impl DocumentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DocumentStatus::Reviewed | DocumentStatus::Failed)
    }

    /// Whether the pipeline may move from `self` to `next`. Forward moves
    /// and the failure edge are allowed; everything else is a regression.
    pub fn can_advance_to(self, next: DocumentStatus) -> bool {
        if next == DocumentStatus::Failed {
            return self != DocumentStatus::Reviewed;
        }
        !self.is_terminal() && next > self
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::OcrDone => "ocr_done",
            DocumentStatus::Extracted => "extracted",
            DocumentStatus::Validated => "validated",
            DocumentStatus::Merged => "merged",
            DocumentStatus::Reviewed => "reviewed",
            DocumentStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Per-document record: raw OCR text plus the fields extracted from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document_id: String,
    pub case_id: String,
    pub status: DocumentStatus,
    pub raw_text: Option<String>,
    pub fields: BTreeMap<String, ExtractedField>,
}

impl DocumentRecord {
    pub fn new(document_id: impl Into<String>, case_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            case_id: case_id.into(),
            status: DocumentStatus::Uploaded,
            raw_text: None,
            fields: BTreeMap::new(),
        }
    }

    /// Advance the status, enforcing monotonic forward movement. Returns
    /// false (and leaves the record untouched) on a regressive transition.
    pub fn advance_to(&mut self, next: DocumentStatus) -> bool {
        if self.status.can_advance_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    pub fn insert_field(&mut self, field: ExtractedField) {
        self.fields.insert(field.name.clone(), field);
    }
}

/// The best-known value per field across all documents of a case. Rebuilt
/// from scratch on every merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub case_id: String,
    pub fields: BTreeMap<String, ExtractedField>,
}

impl CanonicalRecord {
    pub fn new(case_id: impl Into<String>) -> Self {
        Self {
            case_id: case_id.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ExtractedField> {
        self.fields.get(name)
    }

    pub fn insert(&mut self, field: ExtractedField) {
        self.fields.insert(field.name.clone(), field);
    }
}

/// Kind of schema rule a record value breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationKind {
    MissingRequired,
    TypeMismatch,
    OutOfRange,
    InvalidEnum,
}

/// One broken schema rule. Recomputed on every validation pass, never
/// persisted independently of the record it was computed against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationViolation {
    pub field_name: String,
    pub kind: ViolationKind,
    pub detail: String,
}

impl ValidationViolation {
    pub fn new(field_name: impl Into<String>, kind: ViolationKind, detail: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            kind,
            detail: detail.into(),
        }
    }
}

/// A proposed field value for a reviewer to accept or reject. Never applied
/// to the record automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub field_name: String,
    pub proposed_value: FieldValue,
    pub rationale: String,
    pub confidence: f64,
}

/// Summary counters for one extraction pass.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total_fields: usize,
    pub extracted_fields: usize,
    pub high_confidence_fields: usize,
    pub low_confidence_fields: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_never_regresses() {
        let mut record = DocumentRecord::new("doc-1", "case-1");
        assert!(record.advance_to(DocumentStatus::OcrDone));
        assert!(record.advance_to(DocumentStatus::Extracted));
        assert!(!record.advance_to(DocumentStatus::Uploaded));
        assert_eq!(record.status, DocumentStatus::Extracted);
    }

    #[test]
    fn failed_is_reachable_from_any_active_stage() {
        for status in [
            DocumentStatus::Uploaded,
            DocumentStatus::OcrDone,
            DocumentStatus::Extracted,
            DocumentStatus::Validated,
            DocumentStatus::Merged,
        ] {
            assert!(status.can_advance_to(DocumentStatus::Failed));
        }
        assert!(!DocumentStatus::Reviewed.can_advance_to(DocumentStatus::Failed));
    }

    #[test]
    fn skipping_stages_forward_is_allowed_but_backward_is_not() {
        assert!(DocumentStatus::Uploaded.can_advance_to(DocumentStatus::Merged));
        assert!(!DocumentStatus::Merged.can_advance_to(DocumentStatus::Extracted));
        assert!(!DocumentStatus::Failed.can_advance_to(DocumentStatus::Reviewed));
    }

    #[test]
    fn manual_field_carries_full_confidence() {
        let field = ExtractedField::manual("gender", FieldValue::Text("Female".into()));
        assert_eq!(field.confidence, 1.0);
        assert_eq!(field.source, MANUAL_REVIEW_SOURCE);
    }

    #[test]
    fn confidence_is_clamped() {
        let field = ExtractedField::new("age", FieldValue::Number(40.0), 1.7, "doc-1");
        assert_eq!(field.confidence, 1.0);
    }
}
