use rust_decimal::{Decimal, RoundingStrategy};

/// Quantise a monetary amount to 2 decimal places.
///
/// Every intermediate step of the schedule and distribution math rounds
/// through this before the value is used again, matching conventional
/// accounting rounding (half away from zero).
pub fn round2(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
