use thiserror::Error;

/// Error taxonomy for the TRF pipeline.
///
/// Schema violations are deliberately absent: they are data produced by the
/// validator, not failures.
#[derive(Error, Debug)]
pub enum TrfError {
    #[error("OCR collaborator unavailable: {0}")]
    OcrUnavailable(String),

    #[error("inference collaborator unavailable: {0}")]
    InferenceUnavailable(String),

    #[error("inference response could not be parsed: {0}")]
    InferenceMalformed(String),

    #[error("concurrent case mutation detected: {0}")]
    PersistenceConflict(String),

    #[error("manual override rejected for field '{field}': {reason}")]
    InvalidManualOverride { field: String, reason: String },

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("case not found: {0}")]
    CaseNotFound(String),

    #[error("field is not part of the TRF schema: {0}")]
    UnknownField(String),

    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, TrfError>;
