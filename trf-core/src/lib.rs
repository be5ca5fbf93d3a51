pub mod error;
pub mod extractor;
pub mod inference;
pub mod merger;
pub mod ocr;
pub mod processor;
pub mod reasoner;
pub mod record;
pub mod schema;
pub mod storage;
pub mod validator;

// Re-export commonly used types
pub use error::{Result, TrfError};
pub use extractor::FieldExtractor;
pub use inference::{FieldEstimate, InferenceClient, ModelResponse};
pub use merger::RecordMerger;
pub use ocr::OcrEngine;
pub use processor::{CaseOverview, DocumentProcessor, StatusReport};
pub use reasoner::{AgentReasoner, DEFAULT_LOW_CONFIDENCE_THRESHOLD};
pub use record::{
    CanonicalRecord, DocumentRecord, DocumentStatus, ExtractedField, ExtractionStats, FieldValue,
    Suggestion, ValidationViolation, ViolationKind, MANUAL_REVIEW_SOURCE,
};
pub use schema::{FieldRelationship, FieldSpec, FieldType, TrfSchema};
pub use storage::{DocumentStore, InMemoryDocumentStore};
pub use validator::SchemaValidator;

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct FormOcr;

    #[async_trait]
    impl OcrEngine for FormOcr {
        async fn text_of(&self, _document: &[u8], _mime_type: &str) -> Result<String> {
            Ok("Patient Name: Ada Lovelace\nSex: F\nDOB: 10/12/1815\nDiagnosis: Breast carcinoma"
                .to_string())
        }
    }

    struct FormReader;

    #[async_trait]
    impl InferenceClient for FormReader {
        async fn infer(&self, prompt: &str, _schema_hint: &[FieldSpec]) -> Result<ModelResponse> {
            if prompt.contains("Respond in this format") {
                // Single-field reasoner query.
                return Ok(ModelResponse::Text(
                    "VALUE: MRN-100\nCONFIDENCE: 80\nREASONING: header of the form".to_string(),
                ));
            }
            Ok(ModelResponse::Structured(vec![
                FieldEstimate {
                    name: "first_name".to_string(),
                    value: "Ada".to_string(),
                    confidence: Some(0.92),
                },
                FieldEstimate {
                    name: "last_name".to_string(),
                    value: "Lovelace".to_string(),
                    confidence: Some(0.9),
                },
                FieldEstimate {
                    name: "gender".to_string(),
                    value: "F".to_string(),
                    confidence: Some(0.85),
                },
                FieldEstimate {
                    name: "dob".to_string(),
                    value: "10/12/1815".to_string(),
                    confidence: Some(0.8),
                },
                FieldEstimate {
                    name: "primary_diagnosis".to_string(),
                    value: "Breast carcinoma".to_string(),
                    confidence: Some(0.88),
                },
            ]))
        }
    }

    fn build_processor() -> DocumentProcessor {
        let schema = Arc::new(TrfSchema::trf());
        let inference: Arc<dyn InferenceClient> = Arc::new(FormReader);
        DocumentProcessor::new(
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(FormOcr),
            FieldExtractor::new(inference.clone(), schema.clone()),
            SchemaValidator::new(schema.clone()),
            RecordMerger::new(schema.clone()),
            AgentReasoner::new(inference, schema.clone()),
            schema,
        )
    }

    #[tokio::test]
    async fn upload_process_review_roundtrip() {
        let processor = build_processor();

        let document_id = processor
            .ingest("case-7", b"scanned form".to_vec(), "application/pdf")
            .await
            .unwrap();
        let status = processor.process(&document_id).await.unwrap();
        assert_eq!(status, DocumentStatus::Merged);

        // The canonical record holds normalized, typed values.
        let overview = processor.case_overview("case-7").await.unwrap();
        assert_eq!(
            overview.record.get("gender").unwrap().value,
            FieldValue::Text("Female".into())
        );
        assert!(overview
            .violations
            .iter()
            .any(|v| v.field_name == "patient_id" && v.kind == ViolationKind::MissingRequired));

        // A targeted query proposes the missing id; the reviewer accepts it.
        let suggestion = processor
            .query_agent("case-7", "patient_id", "what is the MRN?")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(suggestion.proposed_value, FieldValue::Text("MRN-100".into()));

        processor
            .update_field("case-7", "patient_id", "MRN-100")
            .await
            .unwrap();
        processor.update_field("case-7", "phone", "555-0101").await.unwrap();

        // All required fields resolved: reprocessing reaches Reviewed.
        let status = processor.process(&document_id).await.unwrap();
        assert_eq!(status, DocumentStatus::Reviewed);
    }
}
