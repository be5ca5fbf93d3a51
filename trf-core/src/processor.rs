use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, TrfError};
use crate::extractor::{normalize_value, FieldExtractor};
use crate::merger::RecordMerger;
use crate::ocr::OcrEngine;
use crate::reasoner::AgentReasoner;
use crate::record::{
    CanonicalRecord, DocumentRecord, DocumentStatus, ExtractedField, ExtractionStats, Suggestion,
    ValidationViolation,
};
use crate::schema::TrfSchema;
use crate::storage::DocumentStore;
use crate::validator::{check_field, parse_value, SchemaValidator};

/// Processing state of one document, as reported to callers.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub document_id: String,
    pub case_id: String,
    pub status: DocumentStatus,
    pub stats: ExtractionStats,
}

/// Case-level view: the canonical record plus the current validation pass.
#[derive(Debug, Clone, Serialize)]
pub struct CaseOverview {
    pub record: CanonicalRecord,
    pub violations: Vec<ValidationViolation>,
    pub completion: f64,
}

/// Drives each document through the pipeline and keeps per-case merges
/// serialized. All durable state lives in the store; the processor can be
/// rebuilt from persisted status alone.
pub struct DocumentProcessor {
    store: Arc<dyn DocumentStore>,
    ocr: Arc<dyn OcrEngine>,
    extractor: FieldExtractor,
    validator: SchemaValidator,
    merger: RecordMerger,
    reasoner: AgentReasoner,
    schema: Arc<TrfSchema>,
    /// At most one merge per case at a time. Collaborator calls are issued
    /// outside this lock.
    case_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Uploaded bytes awaiting OCR. File storage is an external concern;
    /// bytes only live here between ingest and the OCR stage.
    pending_uploads: DashMap<String, (Vec<u8>, String)>,
    /// Document ids per case, for raw-text context lookups.
    case_documents: DashMap<String, Vec<String>>,
}

impl DocumentProcessor {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        ocr: Arc<dyn OcrEngine>,
        extractor: FieldExtractor,
        validator: SchemaValidator,
        merger: RecordMerger,
        reasoner: AgentReasoner,
        schema: Arc<TrfSchema>,
    ) -> Self {
        Self {
            store,
            ocr,
            extractor,
            validator,
            merger,
            reasoner,
            schema,
            case_locks: DashMap::new(),
            pending_uploads: DashMap::new(),
            case_documents: DashMap::new(),
        }
    }

    /// Register an uploaded document and return its id. The document starts
    /// in `Uploaded`; nothing runs until `process` is called.
    pub async fn ingest(&self, case_id: &str, bytes: Vec<u8>, mime_type: &str) -> Result<String> {
        let document_id = Uuid::new_v4().to_string();
        let record = DocumentRecord::new(document_id.as_str(), case_id);
        self.store.put(record).await?;
        self.pending_uploads
            .insert(document_id.clone(), (bytes, mime_type.to_string()));
        self.case_documents
            .entry(case_id.to_string())
            .or_default()
            .push(document_id.clone());
        info!(document_id = %document_id, case_id = %case_id, "document ingested");
        Ok(document_id)
    }

    /// Run the pipeline for one document as far as it will go. Safe to
    /// re-invoke at any stage: completed stages are skipped, a `Validated`
    /// document re-runs validation rather than re-extracting, and a
    /// `Failed` document resumes at the furthest stage its persisted data
    /// supports.
    pub async fn process(&self, document_id: &str) -> Result<DocumentStatus> {
        loop {
            let record = self.load(document_id).await?;
            let stage = match record.status {
                DocumentStatus::Failed => match self.recovery_stage(&record) {
                    Some(stage) => stage,
                    None => return Ok(DocumentStatus::Failed),
                },
                DocumentStatus::Reviewed => return Ok(DocumentStatus::Reviewed),
                other => other,
            };

            match stage {
                DocumentStatus::Uploaded => self.run_ocr(record).await?,
                DocumentStatus::OcrDone => self.run_extraction(record).await?,
                DocumentStatus::Extracted => self.run_document_validation(record).await?,
                DocumentStatus::Validated => self.run_merge(record).await?,
                DocumentStatus::Merged => return self.run_review_check(record).await,
                DocumentStatus::Reviewed | DocumentStatus::Failed => unreachable!(),
            }
        }
    }

    /// Current status plus extraction counters for one document.
    pub async fn status(&self, document_id: &str) -> Result<StatusReport> {
        let record = self.load(document_id).await?;
        Ok(StatusReport {
            document_id: record.document_id.clone(),
            case_id: record.case_id.clone(),
            status: record.status,
            stats: FieldExtractor::stats(&record, &self.schema),
        })
    }

    /// The canonical record for a case.
    pub async fn get_canonical(&self, case_id: &str) -> Result<CanonicalRecord> {
        self.store
            .get_case(case_id)
            .await?
            .ok_or_else(|| TrfError::CaseNotFound(case_id.to_string()))
    }

    /// Canonical record plus a fresh validation pass and completion ratio.
    pub async fn case_overview(&self, case_id: &str) -> Result<CaseOverview> {
        let record = self.get_canonical(case_id).await?;
        let violations = self.validator.validate(&record);
        let completion = self.validator.completion(&record);
        Ok(CaseOverview {
            record,
            violations,
            completion,
        })
    }

    /// Manual reviewer override for one field. The value must satisfy the
    /// field spec; a rejected write leaves the prior value untouched.
    pub async fn update_field(
        &self,
        case_id: &str,
        field_name: &str,
        value: &str,
    ) -> Result<CanonicalRecord> {
        let spec = self
            .schema
            .get(field_name)
            .ok_or_else(|| TrfError::UnknownField(field_name.to_string()))?;

        let normalized = normalize_value(spec, value);
        let typed = parse_value(spec, &normalized).map_err(|reason| {
            TrfError::InvalidManualOverride {
                field: field_name.to_string(),
                reason,
            }
        })?;
        let field = ExtractedField::manual(field_name, typed);
        if let Some(violation) = check_field(spec, &field) {
            return Err(TrfError::InvalidManualOverride {
                field: field_name.to_string(),
                reason: violation.detail,
            });
        }

        let lock = self.case_lock(case_id);
        let _guard = lock.lock().await;
        let mut record = self
            .store
            .get_case(case_id)
            .await?
            .ok_or_else(|| TrfError::CaseNotFound(case_id.to_string()))?;
        record.insert(field);
        self.store.put_case(record.clone()).await?;
        info!(case_id = %case_id, field = %field_name, "manual override applied");
        Ok(record)
    }

    /// Full suggestion sweep for a case. The canonical record is read once
    /// at the start; a merge landing mid-sweep is not observed.
    pub async fn get_suggestions(&self, case_id: &str) -> Result<Vec<Suggestion>> {
        let snapshot = self.get_canonical(case_id).await?;
        let violations = self.validator.validate(&snapshot);
        let context = self.case_raw_text(case_id).await;
        Ok(self
            .reasoner
            .suggest(&snapshot, &violations, context.as_deref())
            .await)
    }

    /// Targeted single-field reviewer question.
    pub async fn query_agent(
        &self,
        case_id: &str,
        field_name: &str,
        question: &str,
    ) -> Result<Option<Suggestion>> {
        let snapshot = self.get_canonical(case_id).await?;
        let context = self.case_raw_text(case_id).await;
        self.reasoner
            .query(&snapshot, field_name, question, context.as_deref())
            .await
    }

    async fn load(&self, document_id: &str) -> Result<DocumentRecord> {
        self.store
            .get(document_id)
            .await?
            .ok_or_else(|| TrfError::DocumentNotFound(document_id.to_string()))
    }

    /// Furthest stage a failed document can resume at, judged from its
    /// persisted data. `None` means there is nothing left to retry with.
    fn recovery_stage(&self, record: &DocumentRecord) -> Option<DocumentStatus> {
        if record.raw_text.is_none() {
            return self
                .pending_uploads
                .contains_key(&record.document_id)
                .then_some(DocumentStatus::Uploaded);
        }
        if record.fields.is_empty() {
            Some(DocumentStatus::OcrDone)
        } else {
            Some(DocumentStatus::Validated)
        }
    }

    async fn run_ocr(&self, mut record: DocumentRecord) -> Result<()> {
        let document_id = record.document_id.clone();
        let Some(upload) = self.pending_uploads.get(&document_id).map(|e| e.value().clone())
        else {
            record.status = DocumentStatus::Failed;
            self.store.put(record).await?;
            return Err(TrfError::OcrUnavailable(format!(
                "no uploaded bytes for document {}",
                document_id
            )));
        };
        let (bytes, mime_type) = upload;

        match self.ocr.text_of(&bytes, &mime_type).await {
            Ok(text) => {
                info!(document_id = %document_id, chars = text.len(), "OCR finished");
                record.raw_text = Some(text);
                record.status = DocumentStatus::OcrDone;
                self.pending_uploads.remove(&document_id);
                self.store.put(record).await
            }
            Err(e) => {
                warn!(document_id = %document_id, error = %e, "OCR failed");
                record.status = DocumentStatus::Failed;
                self.store.put(record).await?;
                Err(e)
            }
        }
    }

    async fn run_extraction(&self, record: DocumentRecord) -> Result<()> {
        let raw_text = record.raw_text.clone().unwrap_or_default();
        // Snapshot of the case biases extraction toward known values. Read
        // without the case lock; inference must not block merges.
        let prior = self.store.get_case(&record.case_id).await?;

        let mut extracted = self
            .extractor
            .extract(&record.document_id, &record.case_id, &raw_text, prior.as_ref())
            .await;
        extracted.raw_text = record.raw_text.clone();

        let failed = extracted.status == DocumentStatus::Failed;
        self.store.put(extracted).await?;
        if failed {
            return Err(TrfError::InferenceUnavailable(format!(
                "extraction failed for document {}",
                record.document_id
            )));
        }
        Ok(())
    }

    async fn run_document_validation(&self, mut record: DocumentRecord) -> Result<()> {
        // Early per-document signal: validate this document's fields as a
        // candidate record. Violations are ephemeral, only logged here.
        let candidate = self.merger.merge(None, &record);
        let violations = self.validator.validate(&candidate);
        info!(
            document_id = %record.document_id,
            violations = violations.len(),
            "document fields validated"
        );
        record.advance_to(DocumentStatus::Validated);
        self.store.put(record).await
    }

    async fn run_merge(&self, mut record: DocumentRecord) -> Result<()> {
        let lock = self.case_lock(&record.case_id);
        let _guard = lock.lock().await;

        let existing = self.store.get_case(&record.case_id).await?;
        let merged = self.merger.merge(existing.as_ref(), &record);
        let violations = self.validator.validate(&merged);
        info!(
            case_id = %record.case_id,
            document_id = %record.document_id,
            fields = merged.fields.len(),
            violations = violations.len(),
            "canonical record rebuilt"
        );
        self.store.put_case(merged).await?;

        if record.status == DocumentStatus::Failed {
            record.status = DocumentStatus::Merged;
        } else {
            record.advance_to(DocumentStatus::Merged);
        }
        self.store.put(record).await
    }

    /// A merged document becomes `Reviewed` once the canonical record
    /// validates clean, i.e. review resolved every violation.
    async fn run_review_check(&self, mut record: DocumentRecord) -> Result<DocumentStatus> {
        let canonical = self.get_canonical(&record.case_id).await?;
        if self.validator.validate(&canonical).is_empty() {
            record.advance_to(DocumentStatus::Reviewed);
            self.store.put(record).await?;
            Ok(DocumentStatus::Reviewed)
        } else {
            Ok(DocumentStatus::Merged)
        }
    }

    fn case_lock(&self, case_id: &str) -> Arc<Mutex<()>> {
        self.case_locks
            .entry(case_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Concatenated raw text of the case's documents, for agent context.
    async fn case_raw_text(&self, case_id: &str) -> Option<String> {
        let ids = self.case_documents.get(case_id)?.value().clone();
        let mut combined = String::new();
        for id in ids {
            if let Ok(Some(record)) = self.store.get(&id).await {
                if let Some(text) = record.raw_text {
                    if !combined.is_empty() {
                        combined.push_str("\n\n");
                    }
                    combined.push_str(&text);
                }
            }
        }
        (!combined.is_empty()).then_some(combined)
    }
}
