//! Gemini-powered receipt extraction

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::config::GeminiConfig;
use crate::error::SplitError;
use crate::gemini::{GeminiClient, StructuredRequest};
use crate::media::MediaPayload;
use crate::models::{ReceiptData, SG_GST_RATE_PERCENT, SG_SERVICE_CHARGE_RATE_PERCENT};
use crate::Result;

use super::{parse_receipt_response, ReceiptExtractor};

/// Low temperature for factual extraction
const EXTRACTION_TEMPERATURE: f32 = 0.1;

pub struct GeminiReceiptExtractor {
    client: GeminiClient,
}

impl GeminiReceiptExtractor {
    pub fn new(config: &GeminiConfig) -> Result<Self> {
        Ok(Self {
            client: GeminiClient::new(config)?,
        })
    }

    fn build_request(image: &MediaPayload) -> StructuredRequest {
        StructuredRequest {
            media: image.clone(),
            instruction: build_prompt(),
            response_schema: receipt_schema(),
            temperature: Some(EXTRACTION_TEMPERATURE),
        }
    }
}

#[async_trait]
impl ReceiptExtractor for GeminiReceiptExtractor {
    async fn extract(&self, image: &MediaPayload) -> Result<ReceiptData> {
        info!(mime_type = %image.mime_type, "Extracting receipt");

        let text = self
            .client
            .generate_structured(&Self::build_request(image))
            .await
            .map_err(|e| SplitError::IngestionFailed(e.to_string()))?;

        parse_receipt_response(&text)
    }
}

fn build_prompt() -> String {
    format!(
        r#"Analyze this Singapore restaurant receipt. Extract the line items, prices, subtotal, service charge, GST, and total.
Ignore non-food items like 'Pax: 4' or table numbers in the item list.
Ensure numeric values are numbers, not strings.
If service charge or GST is not explicitly listed, extract 0, but usually in Singapore it is {}% Service and {}% GST.
Return purely JSON matching the schema."#,
        SG_SERVICE_CHARGE_RATE_PERCENT, SG_GST_RATE_PERCENT
    )
}

fn receipt_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "merchantName": { "type": "STRING", "description": "Name of the restaurant or establishment" },
            "date": { "type": "STRING", "description": "Date of the transaction in YYYY-MM-DD format" },
            "items": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "name": { "type": "STRING", "description": "Name of the dish or item" },
                        "price": { "type": "NUMBER", "description": "Price of the individual item before tax/service" }
                    },
                    "required": ["name", "price"]
                }
            },
            "subtotal": { "type": "NUMBER", "description": "Sum of items before tax/service" },
            "serviceCharge": { "type": "NUMBER", "description": "Service charge amount found on bill (usually 10%)" },
            "gst": { "type": "NUMBER", "description": "GST/Tax amount found on bill (usually 9%)" },
            "total": { "type": "NUMBER", "description": "Grand total amount" }
        },
        "required": ["merchantName", "items", "subtotal", "total"]
    })
}
