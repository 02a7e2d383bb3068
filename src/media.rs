//! Inline media payloads (receipt photos, voice clips)
//!
//! Clients hand us either a browser data URI or raw bytes. The AI service
//! wants bare base64 plus a mime type, so the prefix is split off here.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::SplitError;
use crate::Result;

pub const DEFAULT_IMAGE_MIME: &str = "image/jpeg";
pub const DEFAULT_AUDIO_MIME: &str = "audio/wav";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MediaPayload {
    pub mime_type: String,
    /// Base64 without any `data:` prefix
    pub data: String,
}

impl MediaPayload {
    /// Parse a `data:<mime>;base64,<data>` URI or bare base64 text.
    ///
    /// Bare base64 gets `default_mime`. The data must decode.
    pub fn from_data_uri(input: &str, default_mime: &str) -> Result<Self> {
        let input = input.trim();

        let (mime_type, data) = match input.strip_prefix("data:") {
            Some(rest) => match rest.split_once(";base64,") {
                Some((mime, data)) if !mime.is_empty() => (mime.to_string(), data),
                _ => (default_mime.to_string(), input),
            },
            None => (default_mime.to_string(), input),
        };

        let decoded = general_purpose::STANDARD
            .decode(data)
            .map_err(|e| SplitError::InvalidInput(format!("not base64: {}", e)))?;
        if decoded.is_empty() {
            return Err(SplitError::InvalidInput("empty media payload".to_string()));
        }

        Ok(Self {
            mime_type,
            data: data.to_string(),
        })
    }

    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Approximate decoded size, for logging
    pub fn approx_len(&self) -> usize {
        self.data.len() / 4 * 3
    }
}
