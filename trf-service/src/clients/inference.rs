use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Chat;
use rig::providers::openrouter;
use serde::Deserialize;
use tracing::debug;

use trf_core::{FieldEstimate, FieldSpec, InferenceClient, ModelResponse, Result, TrfError};

const PREAMBLE: &str = "You are an expert medical form assistant that extracts and validates \
information from Test Requisition Forms. Follow the response format in the user message exactly.";

#[derive(Deserialize)]
struct StructuredFields {
    fields: Vec<FieldEstimate>,
}

/// Inference collaborator backed by an OpenRouter-hosted model.
pub struct OpenRouterInference {
    api_key: String,
    model: String,
}

impl OpenRouterInference {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl InferenceClient for OpenRouterInference {
    async fn infer(&self, prompt: &str, _schema_hint: &[FieldSpec]) -> Result<ModelResponse> {
        let client = openrouter::Client::new(&self.api_key);
        let agent = client.agent(&self.model).preamble(PREAMBLE).build();

        let raw = agent
            .chat(prompt, vec![])
            .await
            .map_err(|e| TrfError::InferenceUnavailable(e.to_string()))?;

        parse_model_response(&raw)
    }
}

/// Interpret a raw completion: structured JSON when the model complied,
/// free text otherwise. Only an empty reply counts as malformed.
fn parse_model_response(raw: &str) -> Result<ModelResponse> {
    // Strip markdown code fences if present
    let cleaned = raw
        .trim()
        .strip_prefix("```json")
        .unwrap_or(raw.trim())
        .strip_suffix("```")
        .unwrap_or(raw.trim())
        .trim();

    if cleaned.is_empty() {
        return Err(TrfError::InferenceMalformed("empty model response".to_string()));
    }

    if let Ok(parsed) = serde_json::from_str::<StructuredFields>(cleaned) {
        debug!(fields = parsed.fields.len(), "structured inference response");
        return Ok(ModelResponse::Structured(parsed.fields));
    }
    if let Ok(fields) = serde_json::from_str::<Vec<FieldEstimate>>(cleaned) {
        debug!(fields = fields.len(), "bare-array inference response");
        return Ok(ModelResponse::Structured(fields));
    }

    Ok(ModelResponse::Text(cleaned.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_json_is_parsed_as_structured() {
        let raw = "```json\n{\"fields\":[{\"name\":\"gender\",\"value\":\"F\",\"confidence\":0.9}]}\n```";
        match parse_model_response(raw).unwrap() {
            ModelResponse::Structured(fields) => {
                assert_eq!(fields.len(), 1);
                assert_eq!(fields[0].name, "gender");
            }
            ModelResponse::Text(_) => panic!("expected structured"),
        }
    }

    #[test]
    fn prose_falls_back_to_text() {
        match parse_model_response("gender: Female\ndob: 1990-01-01").unwrap() {
            ModelResponse::Text(text) => assert!(text.contains("gender")),
            ModelResponse::Structured(_) => panic!("expected text"),
        }
    }

    #[test]
    fn empty_reply_is_malformed() {
        assert!(matches!(
            parse_model_response("   "),
            Err(TrfError::InferenceMalformed(_))
        ));
    }
}
