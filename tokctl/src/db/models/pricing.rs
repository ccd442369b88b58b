//! Database models for per-model token pricing.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A purchasable AI model and its per-token price
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct PricingModel {
    pub model_name: String,
    pub provider: String,
    pub price_per_token: Decimal,
    /// ISO 4217 currency code
    pub currency: String,
    pub available_till: DateTime<Utc>,
}

impl PricingModel {
    /// A model can be bought up to and including its `available_till` instant
    pub fn is_available_at(&self, now: DateTime<Utc>) -> bool {
        now <= self.available_till
    }
}
