use serde::{Deserialize, Serialize};
use trf_core::Suggestion;

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub document_id: String,
    pub case_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub document_id: String,
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateFieldRequest {
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryRequest {
    pub field_name: String,
    pub question: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuggestionsResponse {
    pub case_id: String,
    pub suggestions: Vec<Suggestion>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub case_id: String,
    pub suggestion: Option<Suggestion>,
}
