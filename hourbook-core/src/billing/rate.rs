use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::BillingError;
use crate::models::Client;

/// Decimal places stored for hours, rates and amounts.
pub const MONEY_SCALE: u32 = 2;

/// Largest rate a `NUMERIC(12,2)` column holds.
pub fn max_rate() -> Decimal {
    Decimal::new(999_999_999_999, MONEY_SCALE)
}

/// Largest amount a `NUMERIC(14,2)` column holds.
pub fn max_amount() -> Decimal {
    Decimal::new(99_999_999_999_999, MONEY_SCALE)
}

/// Whether `value` has no significant digits past the second decimal place.
pub fn fits_money_scale(value: Decimal) -> bool {
    value.normalize().scale() <= MONEY_SCALE
}

/// Checks a rate against the stored column bounds.
///
/// # Errors
///
/// [`BillingError::InvalidRate`] for a negative rate, a rate above
/// [`max_rate`], or one with more than two decimal places.
pub fn validate_rate(rate: Decimal) -> Result<Decimal, BillingError> {
    if rate < Decimal::ZERO || rate > max_rate() || !fits_money_scale(rate) {
        return Err(BillingError::InvalidRate(rate));
    }
    Ok(rate)
}

/// Picks the hourly rate for a time entry.
///
/// A non-negative explicit override wins; anything else falls back to the
/// client's default rate. The resolved rate must pass [`validate_rate`].
pub fn resolve_rate(
    client: &Client,
    explicit_override: Option<Decimal>,
) -> Result<Decimal, BillingError> {
    let rate = match explicit_override {
        Some(rate) if rate >= Decimal::ZERO => rate,
        _ => client.default_rate,
    };
    validate_rate(rate)
}

/// `hours * rate` rounded half away from zero to two places.
///
/// # Errors
///
/// [`BillingError::AmountOutOfRange`] when the product overflows or does not
/// fit in [`max_amount`].
pub fn line_amount(hours: Decimal, rate: Decimal) -> Result<Decimal, BillingError> {
    hours
        .checked_mul(rate)
        .map(round_money)
        .filter(|amount| amount.abs() <= max_amount())
        .ok_or_else(|| BillingError::AmountOutOfRange(format!("{hours} hours at {rate}")))
}

/// Sums `values`, failing once the running total leaves `[-limit, limit]`.
pub fn checked_total(
    values: impl IntoIterator<Item = Decimal>,
    limit: Decimal,
    what: &str,
) -> Result<Decimal, BillingError> {
    values.into_iter().try_fold(Decimal::ZERO, |total, value| {
        total
            .checked_add(value)
            .filter(|total| total.abs() <= limit)
            .ok_or_else(|| BillingError::AmountOutOfRange(what.to_string()))
    })
}

pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}
