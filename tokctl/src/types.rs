//! Common type definitions shared across the service.
//!
//! # ID Types
//!
//! Ledger rows and offers are keyed by UUIDs; agents, users and models are keyed by the
//! strings the rest of the platform already uses for them.
//!
//! - [`OrderRowId`]: Internal identifier of a row in a user's order ledger
//! - [`OfferId`]: Global offer identifier
//!
//! # Enums
//!
//! - [`DiscountType`]: How a slab level, coupon or offer expresses its discount
//! - [`TokenStatus`]: Whether a model balance is the one an agent is serving from

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

// Type aliases for IDs
pub type OrderRowId = Uuid;
pub type OfferId = Uuid;

/// Largest token balance an account may hold (2^53 - 1).
///
/// Balances are exchanged with browser clients as JSON numbers, so they must stay exactly
/// representable as an IEEE-754 double.
pub const MAX_SAFE_TOKENS: i64 = 9_007_199_254_740_991;

/// Discount representation shared by slab levels, coupons and offers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Percentage,
    Flat,
}

impl fmt::Display for DiscountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscountType::Percentage => write!(f, "percentage"),
            DiscountType::Flat => write!(f, "flat"),
        }
    }
}

/// Status of a per-model token balance
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Active,
    /// Newly purchased models are not switched on automatically
    #[default]
    Inactive,
}

/// Case-insensitive model name comparison used for balance lookups.
pub fn same_model(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

/// Normalised key used to enforce one balance row per model.
pub fn model_key(model_name: &str) -> String {
    model_name.to_lowercase()
}

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_model_ignores_case() {
        assert!(same_model("GPT-4", "gpt-4"));
        assert!(same_model("claude-3", "claude-3"));
        assert!(!same_model("gpt-4", "gpt-4o"));
    }

    #[test]
    fn test_token_status_defaults_to_inactive() {
        assert_eq!(TokenStatus::default(), TokenStatus::Inactive);
        assert_eq!(serde_json::to_string(&TokenStatus::Active).unwrap(), "\"active\"");
    }
}
