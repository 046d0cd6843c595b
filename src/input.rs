//! Input normalization for inquiry requests.
//!
//! Callers send either an inline base64 image plus MIME type, or free text.
//! This module decides which variant applies and rejects anything malformed
//! before any upstream call is made.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;

use crate::error::Error;

/// JSON body accepted by `/analyze` and `/generate-lead`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub text_input: Option<String>,
    #[serde(default)]
    pub prompt_type: Option<usize>,
}

/// A validated inquiry, exactly one variant populated.
#[derive(Debug, Clone)]
pub enum InquiryInput {
    Image { bytes: Vec<u8>, mime_type: String },
    Text { content: String },
}

impl InquiryInput {
    /// Build an image input directly from uploaded bytes (multipart path).
    pub fn from_upload(bytes: Vec<u8>, mime_type: String) -> Result<Self, Error> {
        if bytes.is_empty() {
            return Err(Error::Validation("Uploaded image is empty".to_string()));
        }
        if mime_type.is_empty() {
            return Err(Error::Validation(
                "Uploaded image has no content type".to_string(),
            ));
        }
        Ok(Self::Image { bytes, mime_type })
    }
}

/// Decide which `InquiryInput` variant a JSON body represents.
pub fn normalize(req: &AnalyzeRequest) -> Result<InquiryInput, Error> {
    let has_image = req.image.as_deref().map(|s| !s.is_empty()).unwrap_or(false);
    let has_text = req
        .text_input
        .as_deref()
        .map(|s| !s.trim().is_empty())
        .unwrap_or(false);

    match (has_image, has_text) {
        (false, false) => Err(Error::Validation(
            "No image or text input supplied".to_string(),
        )),
        (true, true) => Err(Error::Validation(
            "Supply either image+mimeType or textInput, not both".to_string(),
        )),
        (true, false) => {
            let mime_type = req
                .mime_type
                .as_deref()
                .filter(|m| !m.is_empty())
                .ok_or_else(|| Error::Validation("Image supplied without mimeType".to_string()))?
                .to_string();

            // Strict alphabet + padding check. Anything the STANDARD engine
            // rejects never reaches the completion service.
            let bytes = BASE64
                .decode(req.image.as_deref().unwrap_or_default())
                .map_err(|_| Error::Validation("Image payload is not valid base64".to_string()))?;

            if bytes.is_empty() {
                return Err(Error::Validation("Image payload is empty".to_string()));
            }

            Ok(InquiryInput::Image { bytes, mime_type })
        }
        (false, true) => Ok(InquiryInput::Text {
            content: req.text_input.as_deref().unwrap_or_default().to_string(),
        }),
    }
}
