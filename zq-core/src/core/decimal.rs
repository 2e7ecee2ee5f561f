//! Decimal helpers for monetary math
//!
//! All monetary and quantity fields use [`rust_decimal::Decimal`]: exact
//! addition, subtraction and multiplication, checked division. Floats never
//! enter the cache, execution, or risk paths; metrics convert realized
//! returns to f64 after the fact.

use crate::core::errors::{BusinessError, ZqError};
use rust_decimal::Decimal;

/// Checked division; `DivisionByZero` instead of a panic.
pub fn checked_div(numerator: Decimal, denominator: Decimal) -> Result<Decimal, ZqError> {
    numerator
        .checked_div(denominator)
        .ok_or(ZqError::Business(BusinessError::DivisionByZero))
}

/// Floor a quantity to the venue lot size.
///
/// A zero or negative lot size leaves the quantity untouched.
pub fn floor_to_lot(qty: Decimal, lot: Decimal) -> Decimal {
    if lot <= Decimal::ZERO {
        return qty;
    }
    (qty / lot).floor() * lot
}

/// Serialize a decimal as (mantissa i128, scale u8), the checkpoint wire form.
pub fn to_parts(d: Decimal) -> (i128, u8) {
    (d.mantissa(), d.scale() as u8)
}

/// Rebuild a decimal from checkpoint wire parts.
pub fn from_parts(mantissa: i128, scale: u8) -> Decimal {
    Decimal::from_i128_with_scale(mantissa, scale as u32)
}
