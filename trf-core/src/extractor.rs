use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::TrfError;
use crate::inference::{FieldEstimate, InferenceClient, ModelResponse};
use crate::record::{
    CanonicalRecord, DocumentRecord, DocumentStatus, ExtractedField, ExtractionStats, FieldValue,
};
use crate::schema::{FieldSpec, FieldType, TrfSchema};
use crate::validator::parse_value;

/// Confidence assigned when the value appears verbatim in the OCR text.
const VERBATIM_CONFIDENCE: f64 = 0.9;
/// Confidence when the value is only found after case/whitespace folding.
const FUZZY_CONFIDENCE: f64 = 0.6;
/// Confidence when the value cannot be located in the OCR text at all.
const UNGROUNDED_CONFIDENCE: f64 = 0.4;
/// Penalty applied when OCR-ambiguous glyphs sit in or next to the match.
const AMBIGUOUS_GLYPH_PENALTY: f64 = 0.15;

const AMBIGUOUS_GLYPHS: &[char] = &['0', 'O', '1', 'l', 'I', '5', 'S', '8', 'B', '|'];

const EXTRACTION_PREAMBLE: &str = "You are an expert medical form reader. Extract the requested \
fields from the OCR text of a Test Requisition Form. Respond with ONLY this JSON, no commentary:\n\
{\"fields\": [{\"name\": \"<field name>\", \"value\": \"<value>\", \"confidence\": <0.0-1.0>}]}\n\
Omit any field you cannot find. Never invent values.";

/// Converts raw OCR text into a confidence-scored document record by way of
/// the inference collaborator.
pub struct FieldExtractor {
    inference: Arc<dyn InferenceClient>,
    schema: Arc<TrfSchema>,
}

impl FieldExtractor {
    pub fn new(inference: Arc<dyn InferenceClient>, schema: Arc<TrfSchema>) -> Self {
        Self { inference, schema }
    }

    /// Extract fields for one document. Transport failures yield a `Failed`
    /// record; unparseable model output yields an empty `Extracted` record.
    /// Neither case raises.
    pub async fn extract(
        &self,
        document_id: &str,
        case_id: &str,
        raw_text: &str,
        prior_context: Option<&CanonicalRecord>,
    ) -> DocumentRecord {
        let mut record = DocumentRecord::new(document_id, case_id);
        record.raw_text = Some(raw_text.to_string());

        let prompt = self.build_prompt(raw_text, prior_context);
        match self.inference.infer(&prompt, self.schema.fields()).await {
            Ok(ModelResponse::Structured(estimates)) => {
                self.apply_estimates(&mut record, estimates, raw_text);
                record.advance_to(DocumentStatus::Extracted);
            }
            Ok(ModelResponse::Text(text)) => {
                let estimates = parse_freeform_response(&text);
                self.apply_estimates(&mut record, estimates, raw_text);
                record.advance_to(DocumentStatus::Extracted);
            }
            Err(TrfError::InferenceMalformed(reason)) => {
                // Zero-information response: carry on with an empty record.
                warn!(document_id = %document_id, %reason, "malformed inference response, extraction is empty");
                record.advance_to(DocumentStatus::Extracted);
            }
            Err(e) => {
                warn!(document_id = %document_id, error = %e, "inference unavailable, marking document failed");
                record.advance_to(DocumentStatus::Failed);
            }
        }

        let stats = Self::stats(&record, &self.schema);
        info!(
            document_id = %document_id,
            extracted = stats.extracted_fields,
            high_confidence = stats.high_confidence_fields,
            "field extraction finished"
        );
        record
    }

    fn build_prompt(&self, raw_text: &str, prior_context: Option<&CanonicalRecord>) -> String {
        let mut prompt = String::from(EXTRACTION_PREAMBLE);
        prompt.push_str("\n\nFields to extract:\n");
        for spec in self.schema.fields() {
            let _ = write!(prompt, "- {} ({:?}", spec.name, spec.field_type);
            if !spec.valid_values.is_empty() {
                let _ = write!(prompt, ", one of: {}", spec.valid_values.join("/"));
            }
            let _ = writeln!(prompt, "): {}", spec.description);
        }

        if let Some(prior) = prior_context.filter(|p| !p.fields.is_empty()) {
            prompt.push_str(
                "\nPreviously confirmed values for this patient; prefer readings consistent with them:\n",
            );
            for field in prior.fields.values() {
                let _ = writeln!(prompt, "- {}: {}", field.name, field.value);
            }
        }

        prompt.push_str("\nOCR text:\n");
        prompt.push_str(raw_text);
        prompt
    }

    fn apply_estimates(
        &self,
        record: &mut DocumentRecord,
        estimates: Vec<FieldEstimate>,
        raw_text: &str,
    ) {
        let source = record.document_id.clone();
        for estimate in estimates {
            let Some(spec) = self.schema.get(&estimate.name) else {
                debug!(field = %estimate.name, "model returned a field outside the schema, dropping");
                continue;
            };
            let raw_value = estimate.value.trim();
            if raw_value.is_empty() || is_not_found(raw_value) {
                continue;
            }

            let normalized = normalize_value(spec, raw_value);
            let value = parse_value(spec, &normalized)
                .unwrap_or_else(|_| FieldValue::Text(normalized.clone()));
            let confidence = estimate
                .confidence
                .map(|c| c.clamp(0.0, 1.0))
                .unwrap_or_else(|| heuristic_confidence(raw_value, raw_text));

            record.insert_field(ExtractedField::new(
                spec.name.as_str(),
                value,
                confidence,
                source.as_str(),
            ));
        }
    }

    /// Summary counters for an extraction pass, with 0.7 as the
    /// high-confidence cutoff.
    pub fn stats(record: &DocumentRecord, schema: &TrfSchema) -> ExtractionStats {
        let high = record.fields.values().filter(|f| f.confidence >= 0.7).count();
        ExtractionStats {
            total_fields: schema.fields().len(),
            extracted_fields: record.fields.len(),
            high_confidence_fields: high,
            low_confidence_fields: record.fields.len() - high,
        }
    }
}

/// Normalize a raw value for an enum spec onto its canonical member, with
/// the usual shorthand seen on forms (M/F, checked boxes in lowercase).
pub fn normalize_value(spec: &FieldSpec, raw: &str) -> String {
    if spec.field_type != FieldType::Enum {
        return raw.to_string();
    }

    let folded = raw.trim().to_lowercase();
    let expanded = match (spec.name.as_str(), folded.as_str()) {
        ("gender", "m" | "male" | "man") => "male",
        ("gender", "f" | "female" | "woman") => "female",
        _ => folded.as_str(),
    };

    spec.valid_values
        .iter()
        .find(|member| member.to_lowercase() == expanded)
        .cloned()
        .unwrap_or_else(|| raw.trim().to_string())
}

fn is_not_found(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "not found" | "none" | "n/a" | "unknown" | "null"
    )
}

/// Derive a confidence score for a value the model did not score itself.
/// Grounding the value in the OCR text is the main signal; OCR-ambiguous
/// glyphs in or immediately around the match lower it.
pub fn heuristic_confidence(value: &str, raw_text: &str) -> f64 {
    let value = value.trim();
    if value.is_empty() {
        return 0.0;
    }

    let score = if let Some(position) = raw_text.find(value) {
        let mut score = VERBATIM_CONFIDENCE;
        let start = position.saturating_sub(2);
        let end = (position + value.len() + 2).min(raw_text.len());
        let neighborhood = &raw_text[start..end];
        if neighborhood.chars().any(|c| AMBIGUOUS_GLYPHS.contains(&c)) {
            score -= AMBIGUOUS_GLYPH_PENALTY;
        }
        score
    } else if fuzzy_contains(raw_text, value) {
        FUZZY_CONFIDENCE
    } else {
        UNGROUNDED_CONFIDENCE
    };

    score.clamp(0.0, 1.0)
}

fn fold(text: &str) -> String {
    text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn fuzzy_contains(raw_text: &str, value: &str) -> bool {
    fold(raw_text).contains(&fold(value))
}

/// Parse a free-text inference response of `name: value` lines. Anything
/// that does not look like a field line is ignored.
fn parse_freeform_response(text: &str) -> Vec<FieldEstimate> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim().trim_start_matches('-').trim();
            let (name, value) = line.split_once(':')?;
            let name = name.trim().to_lowercase().replace(' ', "_");
            let value = value.trim();
            if name.is_empty() || value.is_empty() {
                return None;
            }
            Some(FieldEstimate {
                name,
                value: value.to_string(),
                confidence: None,
            })
        })
        .collect()
}
