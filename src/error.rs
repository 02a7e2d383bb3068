//! Error types for the bill splitter

use thiserror::Error;
use uuid::Uuid;

use crate::models::BillStep;

/// Result type alias for bill splitting operations
pub type Result<T> = std::result::Result<T, SplitError>;

#[derive(Error, Debug)]
pub enum SplitError {

    // =============================
    // Session Flow Errors
    // =============================

    #[error("Receipt ingestion failed: {0}")]
    IngestionFailed(String),

    #[error("Voice processing failed: {0}")]
    VoiceProcessingFailed(String),

    #[error("Invalid receipt state: {0}")]
    InvalidReceiptState(String),

    #[error("Operation '{operation}' is not valid in step '{step}'")]
    InvalidTransition {
        operation: &'static str,
        step: BillStep,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Another receipt or voice request is already in flight")]
    RequestInFlight,

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl SplitError {
    /// Whether the user can recover by retrying or assigning manually.
    ///
    /// `InvalidReceiptState` is a broken caller contract and never recoverable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SplitError::IngestionFailed(_)
                | SplitError::VoiceProcessingFailed(_)
                | SplitError::InvalidTransition { .. }
                | SplitError::RequestInFlight
                | SplitError::InvalidInput(_)
        )
    }

    /// Prompt shown to the user for the recoverable external failures
    pub fn retry_prompt(&self) -> Option<&'static str> {
        match self {
            SplitError::IngestionFailed(_) => {
                Some("Failed to analyze receipt. Please try a clearer photo.")
            }
            SplitError::VoiceProcessingFailed(_) => {
                Some("Failed to process voice command. Please try again.")
            }
            _ => None,
        }
    }
}
