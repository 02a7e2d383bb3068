//! Bill summary and the payment message shared with the table

use bigdecimal::{BigDecimal, Zero};
use serde::Serialize;

use crate::allocation::Allocation;
use crate::error::SplitError;
use crate::models::{BillStep, ReceiptData, SG_GST_RATE_PERCENT, SG_SERVICE_CHARGE_RATE_PERCENT};
use crate::money::{format_amount, round_cents};
use crate::state::BillSession;
use crate::Result;

/// Flags worth showing next to the numbers
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Caveat {
    /// Some items are on nobody's bill
    UnassignedItems { count: usize, amount: String },
    /// Service charge is not the usual share of the subtotal
    UnusualServiceCharge,
    /// GST is not the usual share of subtotal plus service charge
    UnusualGst,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub merchant_name: String,
    pub date: String,
    pub receipt_total: BigDecimal,
    pub host_person_id: String,
    pub allocation: Allocation,
    /// Receipt total minus everything allocated
    pub shortfall: BigDecimal,
    pub caveats: Vec<Caveat>,
}

impl Summary {
    /// Summarize a session that has reached the summary step
    pub fn from_session(session: &BillSession) -> Result<Self> {
        if session.step() != BillStep::Summary {
            return Err(SplitError::InvalidTransition {
                operation: "summary",
                step: session.step(),
            });
        }
        let receipt = session.receipt().ok_or_else(|| {
            SplitError::InvalidReceiptState("summary step without a receipt".to_string())
        })?;

        let allocation = session.allocation()?;
        Ok(Self::build(
            receipt,
            allocation,
            &session.state().host_person_id,
        ))
    }

    pub fn build(receipt: &ReceiptData, allocation: Allocation, host_person_id: &str) -> Self {
        let shortfall = &receipt.total - allocation.total_allocated();

        let mut caveats = Vec::new();
        if allocation.has_unassigned() {
            caveats.push(Caveat::UnassignedItems {
                count: allocation.unassigned_item_ids.len(),
                amount: format_amount(&allocation.unassigned_subtotal),
            });
        }
        if !rate_matches(
            &receipt.service_charge,
            &receipt.subtotal,
            SG_SERVICE_CHARGE_RATE_PERCENT,
        ) {
            caveats.push(Caveat::UnusualServiceCharge);
        }
        let gst_base = &receipt.subtotal + &receipt.service_charge;
        if !rate_matches(&receipt.gst, &gst_base, SG_GST_RATE_PERCENT) {
            caveats.push(Caveat::UnusualGst);
        }

        Self {
            merchant_name: receipt.merchant_name.clone(),
            date: receipt.date.clone(),
            receipt_total: receipt.total.clone(),
            host_person_id: host_person_id.to_string(),
            allocation,
            shortfall,
            caveats,
        }
    }
}

/// Zero always passes (not charged); otherwise within 2 cents of `percent` of `base`
fn rate_matches(amount: &BigDecimal, base: &BigDecimal, percent: u32) -> bool {
    if amount.is_zero() {
        return true;
    }
    let expected = base * BigDecimal::from(percent) / BigDecimal::from(100);
    let tolerance = BigDecimal::new(2.into(), 2);
    (amount - expected).abs() <= tolerance
}

/// Plain-text message listing who pays the host what, for a chat share
pub fn render_share_message(summary: &Summary, session: &BillSession) -> String {
    let host = session.host();
    let host_name = host.map(|h| h.name.as_str()).unwrap_or("the host");

    let mut out = String::new();
    out.push_str(&format!("🧾 {}", summary.merchant_name));
    if !summary.date.is_empty() {
        out.push_str(&format!(" ({})", summary.date));
    }
    out.push('\n');
    out.push_str(&format!("Total: {}\n\n", format_amount(&summary.receipt_total)));

    let mut anyone_owes = false;
    for share in &summary.allocation.shares {
        if share.person_id == summary.host_person_id || round_cents(&share.total_owed).is_zero() {
            continue;
        }
        anyone_owes = true;
        out.push_str(&format!(
            "• {} owes {}\n",
            share.name,
            format_amount(&share.total_owed)
        ));
    }
    if !anyone_owes {
        out.push_str("Nobody owes anything yet.\n");
    }

    out.push('\n');
    match host.and_then(|h| h.mobile_number.as_deref()) {
        Some(number) => out.push_str(&format!("PayNow {} at {}\n", host_name, number)),
        None => out.push_str(&format!("Please pay {}\n", host_name)),
    }

    for caveat in &summary.caveats {
        if let Caveat::UnassignedItems { count, amount } = caveat {
            out.push_str(&format!(
                "⚠️ {} item(s) worth {} are not assigned to anyone\n",
                count, amount
            ));
        }
    }

    out
}
