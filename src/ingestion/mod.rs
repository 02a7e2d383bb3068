//! Receipt ingestion
//!
//! The external AI service reads the photo; this module owns the contract
//! around it. Responses are parsed into a strict schema and fail closed:
//! a missing field, a string where a number belongs, or a negative amount
//! rejects the whole receipt.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::SplitError;
use crate::gemini::strip_json_fence;
use crate::media::MediaPayload;
use crate::models::{ReceiptData, ReceiptItem};
use crate::money::decimal_from_f64;
use crate::Result;

pub mod gemini;
pub use gemini::GeminiReceiptExtractor;

/// Turns a receipt photo into receipt data
#[async_trait]
pub trait ReceiptExtractor: Send + Sync {
    async fn extract(&self, image: &MediaPayload) -> Result<ReceiptData>;
}

/// Wire shape returned by the extraction service
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractedReceipt {
    merchant_name: String,
    #[serde(default)]
    date: String,
    items: Vec<ExtractedItem>,
    subtotal: f64,
    #[serde(default)]
    service_charge: f64,
    #[serde(default)]
    gst: f64,
    total: f64,
}

#[derive(Debug, Deserialize)]
struct ExtractedItem {
    name: String,
    price: f64,
}

/// Parse the service's JSON text into a receipt.
///
/// Items get ids `item-0`, `item-1`, … and nobody assigned. Values are
/// otherwise taken verbatim; totals are not reconciled with the items.
pub fn parse_receipt_response(text: &str) -> Result<ReceiptData> {
    let extracted: ExtractedReceipt = serde_json::from_str(strip_json_fence(text))
        .map_err(|e| SplitError::IngestionFailed(format!("unexpected receipt schema: {}", e)))?;

    let ingestion = |e: SplitError| SplitError::IngestionFailed(e.to_string());

    let items = extracted
        .items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| {
            let price = decimal_from_f64(item.price, &format!("price of '{}'", item.name))
                .map_err(ingestion)?;
            Ok(ReceiptItem::new(format!("item-{}", idx), item.name, price))
        })
        .collect::<Result<Vec<_>>>()?;

    let receipt = ReceiptData {
        merchant_name: extracted.merchant_name,
        date: extracted.date,
        items,
        subtotal: decimal_from_f64(extracted.subtotal, "subtotal").map_err(ingestion)?,
        service_charge: decimal_from_f64(extracted.service_charge, "service charge")
            .map_err(ingestion)?,
        gst: decimal_from_f64(extracted.gst, "gst").map_err(ingestion)?,
        total: decimal_from_f64(extracted.total, "total").map_err(ingestion)?,
    };

    if receipt.items.is_empty() {
        warn!(merchant = %receipt.merchant_name, "Receipt parsed with no line items");
    }
    debug!(
        merchant = %receipt.merchant_name,
        items = receipt.items.len(),
        total = %receipt.total,
        "Receipt parsed"
    );

    Ok(receipt)
}

/// Extractor that replays a canned service response.
///
/// Goes through the same parsing path as the live extractor, so it is useful
/// for offline runs and tests.
pub struct FixtureExtractor {
    response: String,
}

impl FixtureExtractor {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

#[async_trait]
impl ReceiptExtractor for FixtureExtractor {
    async fn extract(&self, _image: &MediaPayload) -> Result<ReceiptData> {
        parse_receipt_response(&self.response)
    }
}
