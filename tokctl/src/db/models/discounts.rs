//! Database models for the tiered base-discount slab.
//!
//! There is a single slab for the whole platform. Each level covers an order-value range
//! and carries either a percentage or a flat discount. Level invariants are checked when
//! the slab is written (see [`BaseDiscountSlab::validate`]); readers trust stored levels.

use crate::types::DiscountType;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Highest percentage a slab level may grant
pub const MAX_SLAB_PERCENTAGE: Decimal = Decimal::from_parts(90, 0, 0, false, 0);

/// Highest share of `min_order_value` a flat slab level may grant
pub const MAX_SLAB_FLAT_SHARE: Decimal = Decimal::from_parts(90, 0, 0, false, 2);

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SlabStatus {
    Active,
    #[default]
    Inactive,
}

/// One tier of the base-discount slab
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiscountSlabLevel {
    pub min_order_value: Decimal,
    pub max_order_value: Option<Decimal>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
}

impl DiscountSlabLevel {
    /// Whether `amount` falls inside this level's inclusive range
    pub fn contains(&self, amount: Decimal) -> bool {
        amount >= self.min_order_value && self.max_order_value.is_none_or(|max| amount <= max)
    }

    /// Write-time invariants for a single level
    pub fn validate(&self) -> Result<(), SlabValidationError> {
        if self.min_order_value < Decimal::ZERO {
            return Err(SlabValidationError::NegativeMinimum);
        }
        if let Some(max) = self.max_order_value
            && max < self.min_order_value
        {
            return Err(SlabValidationError::InvertedRange {
                min: self.min_order_value,
                max,
            });
        }
        if self.discount_value < Decimal::ZERO {
            return Err(SlabValidationError::NegativeDiscount);
        }
        match self.discount_type {
            DiscountType::Percentage => {
                if self.discount_value > MAX_SLAB_PERCENTAGE {
                    return Err(SlabValidationError::PercentageTooHigh);
                }
            }
            DiscountType::Flat => {
                if self.min_order_value.is_zero() {
                    return Err(SlabValidationError::FlatFromZero);
                }
                let ceiling = self.min_order_value * MAX_SLAB_FLAT_SHARE;
                if self.discount_value > ceiling {
                    return Err(SlabValidationError::FlatTooHigh {
                        value: self.discount_value,
                        ceiling,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Why a slab cannot be stored
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SlabValidationError {
    #[error("minOrderValue cannot be negative")]
    NegativeMinimum,

    #[error("maxOrderValue ({max}) cannot be lower than minOrderValue ({min})")]
    InvertedRange { min: Decimal, max: Decimal },

    #[error("discountValue cannot be negative")]
    NegativeDiscount,

    #[error("percentage discount cannot exceed {}%", MAX_SLAB_PERCENTAGE)]
    PercentageTooHigh,

    #[error("a level starting at 0 only supports percentage discounts")]
    FlatFromZero,

    #[error("flat discount ({value}) cannot exceed 90% of minOrderValue ({ceiling})")]
    FlatTooHigh { value: Decimal, ceiling: Decimal },

    /// Position is 1-based
    #[error("level {position}: {source}")]
    Level {
        position: usize,
        source: Box<SlabValidationError>,
    },
}

/// The platform-wide base-discount slab
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BaseDiscountSlab {
    pub status: SlabStatus,
    pub levels: Vec<DiscountSlabLevel>,
    pub updated_at: DateTime<Utc>,
}

impl BaseDiscountSlab {
    pub fn is_active(&self) -> bool {
        self.status == SlabStatus::Active
    }

    /// Validate every level, reporting the first offending one by position
    pub fn validate(&self) -> Result<(), SlabValidationError> {
        for (index, level) in self.levels.iter().enumerate() {
            level.validate().map_err(|e| SlabValidationError::Level {
                position: index + 1,
                source: Box::new(e),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(min: &str, max: Option<&str>, discount_type: DiscountType, value: &str) -> DiscountSlabLevel {
        DiscountSlabLevel {
            min_order_value: min.parse().unwrap(),
            max_order_value: max.map(|m| m.parse().unwrap()),
            discount_type,
            discount_value: value.parse().unwrap(),
        }
    }

    #[test]
    fn test_percentage_above_ninety_rejected() {
        assert!(level("0", None, DiscountType::Percentage, "90").validate().is_ok());
        assert!(level("0", None, DiscountType::Percentage, "90.01").validate().is_err());
    }

    #[test]
    fn test_flat_requires_positive_minimum() {
        let err = level("0", Some("100"), DiscountType::Flat, "5").validate().unwrap_err();
        assert_eq!(err, SlabValidationError::FlatFromZero);
        assert!(err.to_string().contains("only supports percentage"));
    }

    #[test]
    fn test_flat_capped_at_ninety_percent_of_minimum() {
        assert!(level("100", None, DiscountType::Flat, "90").validate().is_ok());
        assert!(matches!(
            level("100", None, DiscountType::Flat, "91").validate(),
            Err(SlabValidationError::FlatTooHigh { .. })
        ));
    }

    #[test]
    fn test_inverted_range_rejected() {
        assert!(level("500", Some("100"), DiscountType::Percentage, "5").validate().is_err());
    }

    #[test]
    fn test_contains_is_inclusive() {
        let l = level("100", Some("200"), DiscountType::Percentage, "5");
        assert!(l.contains("100".parse().unwrap()));
        assert!(l.contains("200".parse().unwrap()));
        assert!(!l.contains("200.01".parse().unwrap()));
        assert!(!l.contains("99.99".parse().unwrap()));
    }

    #[test]
    fn test_slab_validation_reports_level_position() {
        let slab = BaseDiscountSlab {
            status: SlabStatus::Active,
            levels: vec![
                level("0", Some("99.99"), DiscountType::Percentage, "5"),
                level("100", None, DiscountType::Percentage, "95"),
            ],
            updated_at: Utc::now(),
        };
        let err = slab.validate().unwrap_err();
        assert!(matches!(err, SlabValidationError::Level { position: 2, .. }));
        assert_eq!(err.to_string(), "level 2: percentage discount cannot exceed 90%");
    }
}
