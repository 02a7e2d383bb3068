//! Gemini API client for structured multimodal extraction
//!
//! Sends one inline media part plus an instruction and asks for JSON that
//! matches a response schema. Uses a long-lived reqwest::Client for
//! connection pooling.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::GeminiConfig;
use crate::error::SplitError;
use crate::media::MediaPayload;

/// One structured generation call
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    pub media: MediaPayload,
    pub instruction: String,
    pub response_schema: serde_json::Value,
    pub temperature: Option<f32>,
}

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> crate::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            endpoint: format!("{}/{}:generateContent", config.base_url, config.model),
        })
    }

    /// Run a structured generation and return the raw JSON text.
    pub async fn generate_structured(&self, request: &StructuredRequest) -> crate::Result<String> {
        if self.api_key.is_empty() {
            return Err(SplitError::LlmError(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let body = GeminiRequest {
            contents: vec![Content {
                parts: vec![
                    Part {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: request.media.mime_type.clone(),
                            data: request.media.data.clone(),
                        }),
                    },
                    Part {
                        text: Some(request.instruction.clone()),
                        inline_data: None,
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                response_schema: request.response_schema.clone(),
                temperature: request.temperature,
            },
        };

        info!(
            mime_type = %request.media.mime_type,
            approx_bytes = request.media.approx_len(),
            "Calling Gemini API"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                SplitError::LlmError(format!("Gemini API error: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            return Err(SplitError::LlmError(format!(
                "Gemini API error ({}): {}",
                status, error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            SplitError::LlmError(format!("Gemini parse error: {}", e))
        })?;

        let text = first_candidate_text(gemini_response)?;
        debug!(chars = text.len(), "Gemini response received");

        Ok(text)
    }
}

fn first_candidate_text(response: GeminiResponse) -> crate::Result<String> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| SplitError::LlmError("No response from Gemini API".to_string()))?;

    if let Some(reason) = candidate.finish_reason.as_deref() {
        if reason != "STOP" {
            debug!(finish_reason = reason, "Gemini candidate did not stop cleanly");
        }
    }

    let text: String = candidate
        .content
        .map(|c| c.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|p| p.text)
        .collect();

    if text.trim().is_empty() {
        return Err(SplitError::LlmError("Empty response from Gemini".to_string()));
    }

    Ok(text)
}

/// Strip a ```json fence the model sometimes wraps around its answer
pub fn strip_json_fence(text: &str) -> &str {
    text.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
    response_schema: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}
