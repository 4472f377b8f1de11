//! Currency-unit to minor-unit conversion for gateway amounts.

use crate::errors::ServiceError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Converts `total + shipping` (in rupees) to paise, rounding half away from zero.
///
/// Decimal arithmetic keeps values such as 499.5 exact.
pub fn to_minor_units(total: Decimal, shipping: Decimal) -> Result<i64, ServiceError> {
    let amount = total
        .checked_add(shipping)
        .and_then(|sum| sum.checked_mul(Decimal::ONE_HUNDRED))
        .ok_or_else(|| ServiceError::ValidationError("Order amount is out of range".into()))?;

    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(ServiceError::ValidationError(
            "Order amount must not be negative".into(),
        ));
    }

    amount
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| ServiceError::ValidationError("Order amount is out of range".into()))
}
