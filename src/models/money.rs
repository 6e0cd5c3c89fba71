//! Conversion between API amounts and stored minor units.
//!
//! Balances and amounts are stored as `i64` cents. Clients send and receive
//! decimal major units; conversion is exact or it fails.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::error::AppError;

/// Number of fractional digits of the ledger currency.
pub const MINOR_UNIT_SCALE: u32 = 2;

/// Convert a decimal major-unit amount into cents.
///
/// Fails when the amount has more than two fractional digits or does not fit
/// into `i64` cents.
pub fn to_cents(amount: Decimal) -> Result<i64, AppError> {
    let scaled = amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .ok_or_else(|| AppError::InvalidRequest(format!("Amount {amount} is out of range")))?;
    if !scaled.fract().is_zero() {
        return Err(AppError::InvalidRequest(format!(
            "Amount {amount} has more than {MINOR_UNIT_SCALE} decimal places"
        )));
    }
    scaled
        .trunc()
        .to_i64()
        .ok_or_else(|| AppError::InvalidRequest(format!("Amount {amount} is out of range")))
}

/// Render cents as a decimal with exactly two fractional digits.
pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, MINOR_UNIT_SCALE)
}

/// Serde adapter rendering an `i64` cents field as a decimal string.
pub mod serde_cents {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(cents: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&super::from_cents(*cents))
    }
}
