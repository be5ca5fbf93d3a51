pub mod inference;
pub mod ocr;

pub use inference::OpenRouterInference;
pub use ocr::RemoteVisionOcr;
