use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::info;

use trf_core::{OcrEngine, Result, TrfError};

const OCR_PROMPT: &str = "You are an expert medical document OCR system. Extract ALL text from \
this document with perfect accuracy, preserving structure and medical terminology. Return ONLY \
the extracted text without any commentary or explanations.";

/// OCR collaborator backed by a vision model behind the OpenRouter
/// chat-completions API.
pub struct RemoteVisionOcr {
    api_key: String,
    model: String,
    client: Client,
}

impl RemoteVisionOcr {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl OcrEngine for RemoteVisionOcr {
    async fn text_of(&self, document: &[u8], mime_type: &str) -> Result<String> {
        let encoded = STANDARD.encode(document);
        let payload = json!({
            "model": self.model,
            "messages": [
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": OCR_PROMPT },
                        {
                            "type": "image_url",
                            "image_url": {
                                "url": format!("data:{};base64,{}", mime_type, encoded)
                            }
                        }
                    ]
                }
            ],
            "max_tokens": 4000
        });

        let response = self
            .client
            .post("https://openrouter.ai/api/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| TrfError::OcrUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TrfError::OcrUnavailable(format!(
                "OCR request failed: {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| TrfError::OcrUnavailable(e.to_string()))?;

        let text = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| TrfError::OcrUnavailable("invalid OCR response format".to_string()))?;

        info!(chars = text.len(), "vision OCR completed");
        Ok(text.to_string())
    }
}
