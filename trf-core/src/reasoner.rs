use regex::Regex;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{Result, TrfError};
use crate::inference::{InferenceClient, ModelResponse};
use crate::record::{
    CanonicalRecord, ExtractedField, FieldValue, Suggestion, ValidationViolation, ViolationKind,
};
use crate::schema::{FieldSpec, TrfSchema};
use crate::validator::{check_field, parse_value};
use crate::extractor::normalize_value;

/// Fields valid but scored below this are still offered for review.
pub const DEFAULT_LOW_CONFIDENCE_THRESHOLD: f64 = 0.6;

/// OCR context passed to the model is capped to keep prompts bounded.
const MAX_CONTEXT_CHARS: usize = 5000;

const FIELD_PROMPT_PREAMBLE: &str = "You are an expert at extracting specific information from \
medical requisition forms. Answer for exactly one field.\n\
Respond in this format and nothing else:\n\
VALUE: <extracted value, or Not found>\n\
CONFIDENCE: <0-100>\n\
REASONING: <one short sentence>";

/// Produces ranked, locally validated field suggestions for a reviewer.
/// A pure function over (record, violations) plus the inference
/// collaborator; holds no conversational state.
pub struct AgentReasoner {
    inference: Arc<dyn InferenceClient>,
    schema: Arc<TrfSchema>,
    low_confidence_threshold: f64,
}

impl AgentReasoner {
    pub fn new(inference: Arc<dyn InferenceClient>, schema: Arc<TrfSchema>) -> Self {
        Self {
            inference,
            schema,
            low_confidence_threshold: DEFAULT_LOW_CONFIDENCE_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.low_confidence_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Full-record suggestion sweep, ordered by descending severity:
    /// missing required fields first, then invalid values, then valid but
    /// low-confidence fields. One collaborator failure never aborts the
    /// sweep.
    pub async fn suggest(
        &self,
        record: &CanonicalRecord,
        violations: &[ValidationViolation],
        raw_context: Option<&str>,
    ) -> Vec<Suggestion> {
        let targets = self.rank_targets(record, violations);
        info!(case_id = %record.case_id, targets = targets.len(), "starting suggestion sweep");

        let mut suggestions = Vec::new();
        for field_name in targets {
            match self.ask_field(&field_name, record, None, raw_context).await {
                Ok(Some(suggestion)) => suggestions.push(suggestion),
                Ok(None) => {}
                Err(e) => {
                    // Partial-failure isolation: skip the field, keep going.
                    warn!(field = %field_name, error = %e, "suggestion failed for field, continuing sweep");
                }
            }
        }
        suggestions
    }

    /// Targeted single-field query for interactive reviewer Q&A. Shares the
    /// prompt construction and validation filter with the sweep.
    pub async fn query(
        &self,
        record: &CanonicalRecord,
        field_name: &str,
        question: &str,
        raw_context: Option<&str>,
    ) -> Result<Option<Suggestion>> {
        if !self.schema.contains(field_name) {
            return Err(TrfError::UnknownField(field_name.to_string()));
        }
        self.ask_field(field_name, record, Some(question), raw_context)
            .await
    }

    /// Review-worthy field names in severity order, deduplicated.
    fn rank_targets(
        &self,
        record: &CanonicalRecord,
        violations: &[ValidationViolation],
    ) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut targets = Vec::new();
        let mut push = |name: &str, seen: &mut BTreeSet<String>| {
            if seen.insert(name.to_string()) {
                targets.push(name.to_string());
            }
        };

        for violation in violations {
            if violation.kind == ViolationKind::MissingRequired {
                push(&violation.field_name, &mut seen);
            }
        }
        for violation in violations {
            if violation.kind != ViolationKind::MissingRequired {
                push(&violation.field_name, &mut seen);
            }
        }
        // Low-confidence-but-valid fields, in schema declaration order.
        for spec in self.schema.fields() {
            if let Some(field) = record.get(&spec.name) {
                if field.confidence < self.low_confidence_threshold {
                    push(&spec.name, &mut seen);
                }
            }
        }

        targets
    }

    async fn ask_field(
        &self,
        field_name: &str,
        record: &CanonicalRecord,
        question: Option<&str>,
        raw_context: Option<&str>,
    ) -> Result<Option<Suggestion>> {
        let Some(spec) = self.schema.get(field_name) else {
            return Ok(None);
        };

        let prompt = self.build_field_prompt(spec, record, question, raw_context);
        let response = match self.inference.infer(&prompt, std::slice::from_ref(spec)).await {
            Ok(response) => response,
            // Malformed output is zero-information for this field.
            Err(TrfError::InferenceMalformed(reason)) => {
                warn!(field = %field_name, %reason, "malformed suggestion response");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let raw = match response {
            ModelResponse::Text(text) => text,
            ModelResponse::Structured(estimates) => {
                let Some(estimate) = estimates.into_iter().find(|e| e.name == spec.name) else {
                    return Ok(None);
                };
                format!(
                    "VALUE: {}\nCONFIDENCE: {}\nREASONING: structured response",
                    estimate.value,
                    estimate.confidence.map(|c| c * 100.0).unwrap_or(50.0)
                )
            }
        };

        Ok(self.parse_proposal(spec, &raw))
    }

    fn build_field_prompt(
        &self,
        spec: &FieldSpec,
        record: &CanonicalRecord,
        question: Option<&str>,
        raw_context: Option<&str>,
    ) -> String {
        let mut prompt = String::from(FIELD_PROMPT_PREAMBLE);
        let _ = write!(prompt, "\n\nField: {} - {}", spec.name, spec.description);
        if !spec.valid_values.is_empty() {
            let _ = write!(prompt, " (allowed values: {})", spec.valid_values.join(", "));
        }

        if let Some(question) = question {
            let _ = write!(prompt, "\nReviewer question: {}", question);
        }

        // The rest of the record is context only; trusted values are never
        // regenerated.
        let known: Vec<String> = record
            .fields
            .values()
            .filter(|f| f.name != spec.name)
            .map(|f| format!("- {}: {}", f.name, f.value))
            .collect();
        if !known.is_empty() {
            let _ = write!(prompt, "\n\nKnown values for this patient:\n{}", known.join("\n"));
        }

        if let Some(raw) = raw_context {
            let excerpt: String = raw.chars().take(MAX_CONTEXT_CHARS).collect();
            let _ = write!(prompt, "\n\nDocument text:\n{}", excerpt);
        }

        prompt
    }

    /// Parse a VALUE/CONFIDENCE/REASONING response and apply the local
    /// validation filter: a proposal the schema validator would reject is
    /// discarded, not surfaced.
    fn parse_proposal(&self, spec: &FieldSpec, raw: &str) -> Option<Suggestion> {
        let value_re = Regex::new(r"(?m)^\s*VALUE:\s*(.+)$").ok()?;
        let confidence_re = Regex::new(r"(?m)^\s*CONFIDENCE:\s*([0-9]+(?:\.[0-9]+)?)").ok()?;
        let reasoning_re = Regex::new(r"(?m)^\s*REASONING:\s*(.+)$").ok()?;

        let value = value_re.captures(raw)?.get(1)?.as_str().trim().to_string();
        if value.is_empty()
            || matches!(
                value.to_lowercase().as_str(),
                "not found" | "none" | "n/a" | "unknown"
            )
        {
            return None;
        }

        let mut confidence = confidence_re
            .captures(raw)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(50.0);
        if confidence > 1.0 {
            confidence /= 100.0;
        }

        let rationale = reasoning_re
            .captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_else(|| "No reasoning provided".to_string());

        let normalized = normalize_value(spec, &value);
        let proposed_value = match parse_value(spec, &normalized) {
            Ok(value) => value,
            Err(reason) => {
                warn!(field = %spec.name, %reason, "discarding proposal that fails the field spec");
                return None;
            }
        };

        let candidate = ExtractedField::new(
            spec.name.as_str(),
            proposed_value.clone(),
            confidence,
            "agent-proposal",
        );
        if let Some(violation) = check_field(spec, &candidate) {
            warn!(field = %spec.name, detail = %violation.detail, "discarding proposal the validator would reject");
            return None;
        }

        Some(Suggestion {
            field_name: spec.name.clone(),
            proposed_value,
            rationale,
            confidence: confidence.clamp(0.0, 1.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Stub that answers per-field, keyed on the `Field: <name>` line the
    /// prompt builder emits, and can fail for chosen fields.
    struct ScriptedInference {
        answers: HashMap<String, String>,
        failing: Vec<String>,
    }

    #[async_trait]
    impl InferenceClient for ScriptedInference {
        async fn infer(&self, prompt: &str, _schema_hint: &[FieldSpec]) -> Result<ModelResponse> {
            for field in &self.failing {
                if prompt.contains(&format!("Field: {} ", field)) {
                    return Err(TrfError::InferenceUnavailable("stub outage".into()));
                }
            }
            for (field, answer) in &self.answers {
                if prompt.contains(&format!("Field: {} ", field)) {
                    return Ok(ModelResponse::Text(answer.clone()));
                }
            }
            Ok(ModelResponse::Text("VALUE: Not found\nCONFIDENCE: 0".into()))
        }
    }

    fn reasoner(answers: &[(&str, String)], failing: &[&str]) -> AgentReasoner {
        let client = ScriptedInference {
            answers: answers
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            failing: failing.iter().map(|f| f.to_string()).collect(),
        };
        AgentReasoner::new(Arc::new(client), Arc::new(TrfSchema::trf()))
    }

    fn answer(value: &str, confidence: u32) -> String {
        format!("VALUE: {}\nCONFIDENCE: {}\nREASONING: seen near the header", value, confidence)
    }

    fn missing(field: &str) -> ValidationViolation {
        ValidationViolation::new(field, ViolationKind::MissingRequired, "missing")
    }

    #[tokio::test]
    async fn sweep_orders_missing_required_before_invalid_before_low_confidence() {
        let reasoner = reasoner(
            &[
                ("first_name", answer("Ada", 90)),
                ("gender", answer("Female", 80)),
                ("phone", answer("555-0101", 70)),
            ],
            &[],
        );

        let mut record = CanonicalRecord::new("case-1");
        record.insert(ExtractedField::new(
            "gender",
            FieldValue::Text("Fem".into()),
            0.9,
            "doc-1",
        ));
        record.insert(ExtractedField::new(
            "phone",
            FieldValue::Text("555-0101".into()),
            0.3,
            "doc-1",
        ));

        let violations = vec![
            ValidationViolation::new("gender", ViolationKind::InvalidEnum, "bad member"),
            missing("first_name"),
        ];

        let suggestions = reasoner.suggest(&record, &violations, None).await;
        let order: Vec<&str> = suggestions.iter().map(|s| s.field_name.as_str()).collect();
        assert_eq!(order, vec!["first_name", "gender", "phone"]);
    }

    #[tokio::test]
    async fn one_failing_field_does_not_abort_the_sweep() {
        let reasoner = reasoner(
            &[
                ("patient_id", answer("MRN-7", 90)),
                ("first_name", answer("Ada", 90)),
                ("last_name", answer("Lovelace", 90)),
                ("primary_diagnosis", answer("Breast carcinoma", 85)),
            ],
            &["phone"],
        );

        let violations = vec![
            missing("patient_id"),
            missing("first_name"),
            missing("last_name"),
            missing("phone"),
            missing("primary_diagnosis"),
        ];

        let suggestions = reasoner
            .suggest(&CanonicalRecord::new("case-1"), &violations, None)
            .await;
        assert_eq!(suggestions.len(), 4);
        assert!(!suggestions.iter().any(|s| s.field_name == "phone"));
    }

    #[tokio::test]
    async fn proposals_failing_the_spec_are_discarded() {
        let reasoner = reasoner(
            &[
                ("gender", answer("Hermaphrodite", 90)),
                ("patient_age", answer("very old", 90)),
            ],
            &[],
        );

        let violations = vec![missing("gender"), missing("patient_age")];
        let suggestions = reasoner
            .suggest(&CanonicalRecord::new("case-1"), &violations, None)
            .await;
        assert!(suggestions.is_empty());
    }

    #[tokio::test]
    async fn surviving_proposals_validate_clean_when_applied() {
        let reasoner = reasoner(
            &[
                ("gender", answer("f", 90)),
                ("dob", answer("17/02/1981", 85)),
                ("patient_age", answer("44", 80)),
            ],
            &[],
        );

        let violations = vec![missing("gender"), missing("dob"), missing("patient_age")];
        let suggestions = reasoner
            .suggest(&CanonicalRecord::new("case-1"), &violations, None)
            .await;
        assert_eq!(suggestions.len(), 3);

        let schema = Arc::new(TrfSchema::trf());
        for suggestion in &suggestions {
            let spec = schema.get(&suggestion.field_name).unwrap();
            let field = ExtractedField::manual(
                suggestion.field_name.as_str(),
                suggestion.proposed_value.clone(),
            );
            assert!(check_field(spec, &field).is_none(), "{} unsound", suggestion.field_name);
        }
    }

    #[tokio::test]
    async fn not_found_answers_yield_no_suggestion() {
        let reasoner = reasoner(&[("email", "VALUE: Not found\nCONFIDENCE: 10\nREASONING: absent".to_string())], &[]);
        let suggestion = reasoner
            .query(&CanonicalRecord::new("case-1"), "email", "what is the email?", None)
            .await
            .unwrap();
        assert!(suggestion.is_none());
    }

    #[tokio::test]
    async fn query_rejects_fields_outside_the_schema() {
        let reasoner = reasoner(&[], &[]);
        let result = reasoner
            .query(&CanonicalRecord::new("case-1"), "shoe_size", "?", None)
            .await;
        assert!(matches!(result, Err(TrfError::UnknownField(_))));
    }

    #[tokio::test]
    async fn query_normalizes_and_scales_confidence() {
        let reasoner = reasoner(&[("gender", answer("M", 76))], &[]);
        let suggestion = reasoner
            .query(&CanonicalRecord::new("case-1"), "gender", "patient gender?", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(suggestion.proposed_value, FieldValue::Text("Male".into()));
        assert!((suggestion.confidence - 0.76).abs() < 1e-9);
        assert_eq!(suggestion.rationale, "seen near the header");
    }

    #[test]
    fn prompt_contains_known_values_but_not_the_target_field() {
        let reasoner = reasoner(&[], &[]);
        let mut record = CanonicalRecord::new("case-1");
        record.insert(ExtractedField::new(
            "first_name",
            FieldValue::Text("Ada".into()),
            0.9,
            "doc-1",
        ));
        record.insert(ExtractedField::new(
            "last_name",
            FieldValue::Text("Lovelace".into()),
            0.9,
            "doc-1",
        ));

        let schema = TrfSchema::trf();
        let spec = schema.get("last_name").unwrap();
        let prompt = reasoner.build_field_prompt(spec, &record, None, Some("raw ocr"));
        assert!(prompt.contains("- first_name: Ada"));
        assert!(!prompt.contains("- last_name: Lovelace"));
        assert!(prompt.contains("raw ocr"));
    }
}
