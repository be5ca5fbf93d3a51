use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::schema::FieldSpec;

/// One field estimate from the inference collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldEstimate {
    pub name: String,
    pub value: String,
    /// Model-reported confidence in [0, 1], when the vendor provides one.
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Response from the inference collaborator: either structured field
/// estimates, or free text the caller must parse locally.
#[derive(Debug, Clone)]
pub enum ModelResponse {
    Structured(Vec<FieldEstimate>),
    Text(String),
}

/// Black-box language-model collaborator used for extraction and
/// suggestion generation. The schema hint lets implementations constrain
/// decoding; they are free to ignore it.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Run one inference call. Fails with
    /// [`crate::TrfError::InferenceUnavailable`] on transport errors and
    /// [`crate::TrfError::InferenceMalformed`] when the vendor returns
    /// something unusable.
    async fn infer(&self, prompt: &str, schema_hint: &[FieldSpec]) -> Result<ModelResponse>;
}
