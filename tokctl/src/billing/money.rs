//! Rounding helpers for money values.
//!
//! Amounts are rounded half away from zero: 2 decimal places for anything billed and
//! 4 for the per-token price shown to the customer.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn round4(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero)
}

/// `percent`% of `amount`, unrounded
pub fn percentage_of(amount: Decimal, percent: Decimal) -> Decimal {
    amount * percent / Decimal::ONE_HUNDRED
}

/// Convert a major-unit amount (rupees) into minor units (paise)
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    (round2(amount) * Decimal::ONE_HUNDRED).trunc().to_i64()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_round2_half_away_from_zero() {
        assert_eq!(round2(d("1.005")), d("1.01"));
        assert_eq!(round2(d("1.004")), d("1.00"));
        assert_eq!(round2(d("9.999")), d("10.00"));
    }

    #[test]
    fn test_round4() {
        assert_eq!(round4(d("0.012345")), d("0.0123"));
        assert_eq!(round4(d("0.00005")), d("0.0001"));
    }

    #[test]
    fn test_percentage_of() {
        assert_eq!(percentage_of(d("10.00"), d("10")), d("1"));
        assert_eq!(round2(percentage_of(d("9.00"), d("95"))), d("8.55"));
    }

    #[test]
    fn test_to_minor_units() {
        assert_eq!(to_minor_units(d("10.00")), Some(1000));
        assert_eq!(to_minor_units(d("0.9")), Some(90));
        assert_eq!(to_minor_units(d("1234.567")), Some(123457));
    }
}
