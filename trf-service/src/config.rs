use anyhow::{anyhow, Result};

/// Service configuration, read from the environment once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub openrouter_api_key: String,
    /// Model used for field extraction and suggestion generation.
    pub extract_model: String,
    /// Vision model used for OCR.
    pub ocr_model: String,
    /// Fields scored below this are offered for review.
    pub confidence_threshold: f64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let openrouter_api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| anyhow!("OPENROUTER_API_KEY environment variable is required"))?;

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .unwrap_or(3000);

        let extract_model = std::env::var("TRF_EXTRACT_MODEL")
            .unwrap_or_else(|_| "openai/gpt-4.1-mini".to_string());
        let ocr_model =
            std::env::var("TRF_OCR_MODEL").unwrap_or_else(|_| "openai/gpt-4.1-mini".to_string());

        let confidence_threshold = std::env::var("TRF_CONFIDENCE_THRESHOLD")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(trf_core::DEFAULT_LOW_CONFIDENCE_THRESHOLD);

        Ok(Self {
            port,
            openrouter_api_key,
            extract_model,
            ocr_model,
            confidence_threshold,
        })
    }
}
