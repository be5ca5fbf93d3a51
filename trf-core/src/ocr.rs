use async_trait::async_trait;

use crate::error::Result;

/// Black-box OCR collaborator. The core only needs raw text back; image
/// handling, preprocessing and vendor choice live behind this seam.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Extract the full text of a document. Transport failures surface as
    /// [`crate::TrfError::OcrUnavailable`].
    async fn text_of(&self, document: &[u8], mime_type: &str) -> Result<String>;
}
