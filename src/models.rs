//! Core data models for the bill splitter

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::media::MediaPayload;

//
// ================= Constants =================
//

/// Nominal Singapore GST rate (9%)
pub const SG_GST_RATE_PERCENT: u32 = 9;

/// Nominal Singapore restaurant service charge (10%)
pub const SG_SERVICE_CHARGE_RATE_PERCENT: u32 = 10;

/// Rotating display palette for people
pub const COLORS: &[&str] = &[
    "#3b82f6", "#10b981", "#f59e0b", "#8b5cf6", "#ef4444", "#ec4899", "#6366f1",
];

/// Person id of the default host
pub const DEFAULT_HOST_ID: &str = "p1";

/// Roster every new session starts with: (id, name, color)
const INITIAL_PEOPLE: &[(&str, &str, &str)] = &[
    ("p1", "Me (Host)", "#3b82f6"),
    ("p2", "Alice", "#10b981"),
    ("p3", "Bob", "#f59e0b"),
    ("p4", "Charlie", "#8b5cf6"),
];

pub fn default_roster() -> Vec<Person> {
    INITIAL_PEOPLE
        .iter()
        .map(|(id, name, color)| Person::new(*id, *name, *color))
        .collect()
}

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BillStep {
    Upload,
    Analyzing,
    Assign,
    Summary,
}

impl fmt::Display for BillStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BillStep::Upload => "upload",
            BillStep::Analyzing => "analyzing",
            BillStep::Assign => "assign",
            BillStep::Summary => "summary",
        };
        write!(f, "{}", s)
    }
}

//
// ================= People =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: String,
    pub name: String,
    pub color: String,
    /// PayNow handle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile_number: Option<String>,
}

impl Person {
    pub fn new(id: impl Into<String>, name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            color: color.into(),
            mobile_number: None,
        }
    }
}

//
// ================= Receipt =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptItem {
    pub id: String,
    pub name: String,
    pub price: BigDecimal,
    /// Person ids sharing this item, no duplicates
    pub assigned_to: Vec<String>,
}

impl ReceiptItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>, price: BigDecimal) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            assigned_to: Vec::new(),
        }
    }

    pub fn is_assigned(&self) -> bool {
        !self.assigned_to.is_empty()
    }
}

/// A receipt as read off the photo.
///
/// `subtotal` and `total` are the printed figures and are never recomputed
/// from the items, even when they drift by a few cents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptData {
    pub merchant_name: String,
    pub date: String,
    pub items: Vec<ReceiptItem>,
    pub subtotal: BigDecimal,
    pub service_charge: BigDecimal,
    pub gst: BigDecimal,
    pub total: BigDecimal,
}

impl ReceiptData {
    pub fn item(&self, item_id: &str) -> Option<&ReceiptItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn item_mut(&mut self, item_id: &str) -> Option<&mut ReceiptItem> {
        self.items.iter_mut().find(|i| i.id == item_id)
    }

    pub fn unassigned_items(&self) -> impl Iterator<Item = &ReceiptItem> {
        self.items.iter().filter(|i| !i.is_assigned())
    }
}

//
// ================= Session =================
//

/// Everything one bill-splitting session knows about.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillState {
    pub step: BillStep,
    #[serde(skip_serializing)]
    #[serde(default)]
    pub receipt_image: Option<MediaPayload>,
    pub raw_receipt_data: Option<ReceiptData>,
    pub people: Vec<Person>,
    /// The person receiving money
    pub host_person_id: String,
}

impl BillState {
    pub fn person(&self, person_id: &str) -> Option<&Person> {
        self.people.iter().find(|p| p.id == person_id)
    }

    pub fn has_person(&self, person_id: &str) -> bool {
        self.person(person_id).is_some()
    }
}

impl Default for BillState {
    fn default() -> Self {
        Self {
            step: BillStep::Upload,
            receipt_image: None,
            raw_receipt_data: None,
            people: default_roster(),
            host_person_id: DEFAULT_HOST_ID.to_string(),
        }
    }
}
