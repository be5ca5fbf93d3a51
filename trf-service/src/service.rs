use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post, put},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use trf_core::{
    AgentReasoner, CaseOverview, DocumentProcessor, FieldExtractor, InMemoryDocumentStore,
    InferenceClient, RecordMerger, SchemaValidator, StatusReport, TrfError, TrfSchema,
};

use crate::{
    clients::{OpenRouterInference, RemoteVisionOcr},
    config::Config,
    models::{
        ProcessResponse, QueryRequest, QueryResponse, SuggestionsResponse, UpdateFieldRequest,
        UploadResponse,
    },
};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn map_core_error(e: TrfError) -> ApiError {
    let status = match &e {
        TrfError::DocumentNotFound(_) | TrfError::CaseNotFound(_) => StatusCode::NOT_FOUND,
        TrfError::InvalidManualOverride { .. } | TrfError::UnknownField(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        TrfError::OcrUnavailable(_) | TrfError::InferenceUnavailable(_) => StatusCode::BAD_GATEWAY,
        TrfError::PersistenceConflict(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() })))
}

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<DocumentProcessor>,
}

pub fn create_app(config: &Config) -> Router {
    let app_state = create_app_state(config);
    build_router(app_state)
}

fn create_app_state(config: &Config) -> AppState {
    let schema = Arc::new(TrfSchema::trf());
    let inference: Arc<dyn InferenceClient> = Arc::new(OpenRouterInference::new(
        config.openrouter_api_key.clone(),
        config.extract_model.clone(),
    ));
    let ocr = Arc::new(RemoteVisionOcr::new(
        config.openrouter_api_key.clone(),
        config.ocr_model.clone(),
    ));

    let processor = DocumentProcessor::new(
        Arc::new(InMemoryDocumentStore::new()),
        ocr,
        FieldExtractor::new(inference.clone(), schema.clone()),
        SchemaValidator::new(schema.clone()),
        RecordMerger::new(schema.clone()),
        AgentReasoner::new(inference, schema.clone()).with_threshold(config.confidence_threshold),
        schema,
    );

    AppState {
        processor: Arc::new(processor),
    }
}

fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/cases/{case_id}/documents", post(upload_document))
        .route("/documents/{document_id}/process", post(process_document))
        .route("/documents/{document_id}", get(document_status))
        .route("/cases/{case_id}", get(case_overview))
        .route("/cases/{case_id}/fields/{field_name}", put(update_field))
        .route("/cases/{case_id}/suggestions", get(case_suggestions))
        .route("/cases/{case_id}/query", post(query_agent))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "TRF Intake Service",
        "version": "0.1.0",
        "description": "Extraction, validation and review assistance for scanned Test Requisition Forms",
        "endpoints": {
            "POST /cases/{case_id}/documents": "Upload a document into a case",
            "POST /documents/{document_id}/process": "Run the extraction pipeline",
            "GET /documents/{document_id}": "Document status and extraction counters",
            "GET /cases/{case_id}": "Canonical record, violations and completion",
            "PUT /cases/{case_id}/fields/{field_name}": "Manual reviewer override",
            "GET /cases/{case_id}/suggestions": "Ranked completion suggestions",
            "POST /cases/{case_id}/query": "Ask the agent about one field",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn upload_document(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<UploadResponse> {
    if body.is_empty() {
        return Err(bad_request_error("document body is required"));
    }
    let mime_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/pdf")
        .to_string();

    info!(case_id = %case_id, bytes = body.len(), %mime_type, "document upload");

    let document_id = state
        .processor
        .ingest(&case_id, body.to_vec(), &mime_type)
        .await
        .map_err(|e| {
            error!(case_id = %case_id, error = %e, "failed to ingest document");
            map_core_error(e)
        })?;

    Ok(Json(UploadResponse {
        document_id,
        case_id,
    }))
}

async fn process_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> ApiResult<ProcessResponse> {
    info!(document_id = %document_id, "processing document");

    let status = state.processor.process(&document_id).await.map_err(|e| {
        error!(document_id = %document_id, error = %e, "processing failed");
        map_core_error(e)
    })?;

    Ok(Json(ProcessResponse {
        document_id,
        status: status.to_string(),
    }))
}

async fn document_status(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> ApiResult<StatusReport> {
    state
        .processor
        .status(&document_id)
        .await
        .map(Json)
        .map_err(map_core_error)
}

async fn case_overview(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
) -> ApiResult<CaseOverview> {
    state
        .processor
        .case_overview(&case_id)
        .await
        .map(Json)
        .map_err(map_core_error)
}

async fn update_field(
    State(state): State<AppState>,
    Path((case_id, field_name)): Path<(String, String)>,
    Json(request): Json<UpdateFieldRequest>,
) -> ApiResult<Value> {
    if request.value.trim().is_empty() {
        return Err(bad_request_error("field value is required"));
    }

    let record = state
        .processor
        .update_field(&case_id, &field_name, &request.value)
        .await
        .map_err(|e| {
            error!(case_id = %case_id, field = %field_name, error = %e, "manual override rejected");
            map_core_error(e)
        })?;

    Ok(Json(json!({
        "case_id": case_id,
        "field_name": field_name,
        "record": record
    })))
}

async fn case_suggestions(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
) -> ApiResult<SuggestionsResponse> {
    let suggestions = state
        .processor
        .get_suggestions(&case_id)
        .await
        .map_err(map_core_error)?;

    Ok(Json(SuggestionsResponse {
        case_id,
        suggestions,
    }))
}

async fn query_agent(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<QueryResponse> {
    if request.question.trim().is_empty() {
        return Err(bad_request_error("question cannot be empty"));
    }

    let suggestion = state
        .processor
        .query_agent(&case_id, &request.field_name, &request.question)
        .await
        .map_err(map_core_error)?;

    Ok(Json(QueryResponse {
        case_id,
        suggestion,
    }))
}
