//! Money helpers
//!
//! Amounts stay as exact `BigDecimal` through every calculation; rounding to
//! cents happens only when something is displayed.

use bigdecimal::{BigDecimal, RoundingMode, Zero};
use std::str::FromStr;

use crate::error::SplitError;
use crate::Result;

/// Convert a JSON number from the AI service into an exact decimal.
///
/// Goes through the shortest round-trip text form, so `4.1` stays `4.1`
/// instead of picking up binary noise. Rejects NaN, infinities and negatives.
pub fn decimal_from_f64(value: f64, field: &str) -> Result<BigDecimal> {
    if !value.is_finite() {
        return Err(SplitError::InvalidReceiptState(format!(
            "{} is not a finite number",
            field
        )));
    }

    let decimal = BigDecimal::from_str(&value.to_string()).map_err(|e| {
        SplitError::InvalidReceiptState(format!("{} is not a decimal: {}", field, e))
    })?;

    if decimal < BigDecimal::zero() {
        return Err(SplitError::InvalidReceiptState(format!(
            "{} is negative ({})",
            field, decimal
        )));
    }

    Ok(decimal)
}

/// Round half-up to whole cents
pub fn round_cents(amount: &BigDecimal) -> BigDecimal {
    amount.with_scale_round(2, RoundingMode::HalfUp)
}

/// `$12.30` style display string
pub fn format_amount(amount: &BigDecimal) -> String {
    format!("${}", round_cents(amount))
}
