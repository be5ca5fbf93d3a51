use std::sync::Arc;
use tracing::debug;

use crate::record::{CanonicalRecord, DocumentRecord, ExtractedField};
use crate::schema::TrfSchema;

/// Combines per-document records into the single canonical view of a case.
///
/// Conflict rule: strictly higher confidence wins; on an exact tie the most
/// recently processed document wins. Absence of a field in a new document
/// is never evidence against an existing value.
pub struct RecordMerger {
    schema: Arc<TrfSchema>,
}

impl RecordMerger {
    pub fn new(schema: Arc<TrfSchema>) -> Self {
        Self { schema }
    }

    /// Rebuild the canonical record from the union of `existing` and
    /// `new_doc`. Fields unknown to the schema are dropped.
    pub fn merge(
        &self,
        existing: Option<&CanonicalRecord>,
        new_doc: &DocumentRecord,
    ) -> CanonicalRecord {
        let mut merged = CanonicalRecord::new(new_doc.case_id.clone());

        if let Some(existing) = existing {
            for field in existing.fields.values() {
                if self.schema.contains(&field.name) {
                    merged.insert(field.clone());
                }
            }
        }

        for field in new_doc.fields.values() {
            if !self.schema.contains(&field.name) {
                debug!(field = %field.name, "dropping field unknown to the schema");
                continue;
            }
            match merged.get(&field.name) {
                // Equal confidence goes to the new document: documents are
                // submitted in temporal order, most recent wins ties.
                Some(current) if current.confidence > field.confidence => {}
                _ => merged.insert(field.clone()),
            }
        }

        merged
    }

    /// Fold a sequence of documents into one canonical record, applying the
    /// same conflict rule document by document.
    pub fn merge_all<'a, I>(&self, case_id: &str, documents: I) -> CanonicalRecord
    where
        I: IntoIterator<Item = &'a DocumentRecord>,
    {
        let mut canonical = CanonicalRecord::new(case_id);
        for document in documents {
            canonical = self.merge(Some(&canonical), document);
        }
        canonical
    }
}

/// Convenience for tests and manual overrides: the winning field between an
/// incumbent and a challenger under the merge rule.
pub fn resolve<'a>(incumbent: &'a ExtractedField, challenger: &'a ExtractedField) -> &'a ExtractedField {
    if incumbent.confidence > challenger.confidence {
        incumbent
    } else {
        challenger
    }
}
