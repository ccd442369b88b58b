//! Database models for user coupons and global offers.

use crate::types::{DiscountType, OfferId, same_model};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Marker in `applicable_products` meaning every model qualifies
pub const ALL_PRODUCTS: &str = "all";

/// A single-use coupon allotted to one user
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct Coupon {
    pub username: String,
    pub coupon_code: String,
    pub used: bool,
    pub min_order_value: Decimal,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub max_discount_amount: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Active,
    #[default]
    Inactive,
}

/// A platform-wide offer redeemable by code
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct Offer {
    pub offer_id: OfferId,
    pub offer_code: Option<String>,
    pub title: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub max_discount_amount: Option<Decimal>,
    pub offer_type: String,
    pub applicable_to: Vec<String>,
    pub min_purchase_amount: Option<Decimal>,
    pub applicable_products: Vec<String>,
    pub usage_limit: Option<i64>,
    pub usage_limit_per_user: Option<i64>,
    pub global_used_count: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: OfferStatus,
}

impl Offer {
    /// Active and inside its inclusive `[start_date, end_date]` window
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.status == OfferStatus::Active && self.start_date <= now && now <= self.end_date
    }

    pub fn applies_to_model(&self, model_name: &str) -> bool {
        self.applicable_products
            .iter()
            .any(|p| p.eq_ignore_ascii_case(ALL_PRODUCTS) || same_model(p, model_name))
    }

    pub fn global_limit_reached(&self) -> bool {
        self.usage_limit.is_some_and(|limit| self.global_used_count >= limit)
    }
}
