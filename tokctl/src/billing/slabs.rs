//! Base-discount resolution against the platform slab.

use super::money::{percentage_of, round2};
use crate::db::models::discounts::{BaseDiscountSlab, DiscountSlabLevel};
use crate::types::DiscountType;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Outcome of applying the slab to a base amount
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BaseDiscount {
    pub applied: bool,
    pub amount: Decimal,
    pub level: Option<DiscountSlabLevel>,
}

impl BaseDiscount {
    pub fn none() -> Self {
        Self {
            applied: false,
            amount: Decimal::ZERO,
            level: None,
        }
    }
}

/// Pick the matching level with the highest `min_order_value`.
///
/// Ties keep the level listed first.
pub fn select_level(slab: &BaseDiscountSlab, base_amount: Decimal) -> Option<&DiscountSlabLevel> {
    slab.levels
        .iter()
        .filter(|level| level.contains(base_amount))
        .fold(None, |best: Option<&DiscountSlabLevel>, level| match best {
            Some(current) if current.min_order_value >= level.min_order_value => Some(current),
            _ => Some(level),
        })
}

/// Discount granted by `level` on `base_amount`, never more than the amount itself
pub fn level_discount(level: &DiscountSlabLevel, base_amount: Decimal) -> Decimal {
    let raw = match level.discount_type {
        DiscountType::Percentage => round2(percentage_of(base_amount, level.discount_value)),
        DiscountType::Flat => round2(level.discount_value),
    };
    raw.max(Decimal::ZERO).min(base_amount)
}

/// Resolve the base discount for `base_amount`. Inactive or missing slabs grant nothing.
pub fn resolve(slab: Option<&BaseDiscountSlab>, base_amount: Decimal) -> BaseDiscount {
    let Some(slab) = slab.filter(|s| s.is_active()) else {
        return BaseDiscount::none();
    };

    match select_level(slab, base_amount) {
        Some(level) => {
            let amount = level_discount(level, base_amount);
            BaseDiscount {
                applied: amount > Decimal::ZERO,
                amount,
                level: Some(level.clone()),
            }
        }
        None => BaseDiscount::none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::discounts::SlabStatus;
    use chrono::Utc;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn level(min: &str, max: Option<&str>, discount_type: DiscountType, value: &str) -> DiscountSlabLevel {
        DiscountSlabLevel {
            min_order_value: d(min),
            max_order_value: max.map(d),
            discount_type,
            discount_value: d(value),
        }
    }

    fn slab(status: SlabStatus, levels: Vec<DiscountSlabLevel>) -> BaseDiscountSlab {
        BaseDiscountSlab {
            status,
            levels,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_ten_percent_from_zero() {
        let s = slab(SlabStatus::Active, vec![level("0", None, DiscountType::Percentage, "10")]);
        let discount = resolve(Some(&s), d("10.00"));
        assert!(discount.applied);
        assert_eq!(discount.amount, d("1.00"));
        assert_eq!(d("10.00") - discount.amount, d("9.00"));
    }

    #[test]
    fn test_highest_matching_tier_wins() {
        let s = slab(
            SlabStatus::Active,
            vec![
                level("0", None, DiscountType::Percentage, "5"),
                level("1000", None, DiscountType::Flat, "200"),
                level("500", Some("2000"), DiscountType::Percentage, "10"),
            ],
        );

        let picked = select_level(&s, d("1500")).unwrap();
        assert_eq!(picked.min_order_value, d("1000"));
        assert_eq!(resolve(Some(&s), d("1500")).amount, d("200"));

        let picked = select_level(&s, d("700")).unwrap();
        assert_eq!(picked.min_order_value, d("500"));
        assert_eq!(resolve(Some(&s), d("700")).amount, d("70.00"));
    }

    #[test]
    fn test_inactive_slab_grants_nothing() {
        let s = slab(SlabStatus::Inactive, vec![level("0", None, DiscountType::Percentage, "10")]);
        assert_eq!(resolve(Some(&s), d("100")), BaseDiscount::none());
        assert_eq!(resolve(None, d("100")), BaseDiscount::none());
    }

    #[test]
    fn test_no_level_in_range() {
        let s = slab(SlabStatus::Active, vec![level("100", Some("200"), DiscountType::Percentage, "10")]);
        let discount = resolve(Some(&s), d("50"));
        assert!(!discount.applied);
        assert!(discount.level.is_none());
    }

    #[test]
    fn test_discount_never_exceeds_base_amount() {
        // Stored levels are trusted at read time, so clamp anyway
        let s = slab(SlabStatus::Active, vec![level("1", None, DiscountType::Flat, "500")]);
        let discount = resolve(Some(&s), d("20"));
        assert_eq!(discount.amount, d("20"));
    }

    #[test]
    fn test_price_after_discount_is_monotonic_in_base_amount() {
        let s = slab(
            SlabStatus::Active,
            vec![
                level("0", Some("999.99"), DiscountType::Percentage, "5"),
                level("1000", None, DiscountType::Percentage, "10"),
            ],
        );
        let mut previous_base = Decimal::ZERO;
        for tokens in [1_i64, 10, 1_000, 99_999, 100_000, 250_000] {
            let base = round2(Decimal::from(tokens) * d("0.01"));
            assert!(base >= previous_base);
            previous_base = base;

            let discount = resolve(Some(&s), base);
            assert!(base - discount.amount <= base);
        }
    }
}
