use super::orders::SlabLevelView;
use crate::db::models::discounts::{BaseDiscountSlab, DiscountSlabLevel, SlabStatus};
use crate::types::DiscountType;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A slab level as written by an administrator.
///
/// Values are accepted as JSON numbers or decimal strings and kept exact.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SlabLevelInput {
    #[schema(value_type = f64)]
    pub min_order_value: Decimal,
    #[serde(default)]
    #[schema(value_type = Option<f64>)]
    pub max_order_value: Option<Decimal>,
    pub discount_type: DiscountType,
    #[schema(value_type = f64)]
    pub discount_value: Decimal,
}

/// Body of `PUT /admin/discount-slab`. Replaces the whole slab.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct DiscountSlabUpdate {
    #[schema(value_type = String, example = "active")]
    pub status: SlabStatus,
    pub levels: Vec<SlabLevelInput>,
}

impl DiscountSlabUpdate {
    pub fn into_slab(self, now: DateTime<Utc>) -> BaseDiscountSlab {
        BaseDiscountSlab {
            status: self.status,
            levels: self
                .levels
                .into_iter()
                .map(|level| DiscountSlabLevel {
                    min_order_value: level.min_order_value,
                    max_order_value: level.max_order_value,
                    discount_type: level.discount_type,
                    discount_value: level.discount_value,
                })
                .collect(),
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiscountSlabResponse {
    pub success: bool,
    #[schema(value_type = String)]
    pub status: SlabStatus,
    pub levels: Vec<SlabLevelView>,
    pub updated_at: DateTime<Utc>,
}

impl From<BaseDiscountSlab> for DiscountSlabResponse {
    fn from(slab: BaseDiscountSlab) -> Self {
        Self {
            success: true,
            status: slab.status,
            levels: slab.levels.iter().map(SlabLevelView::from).collect(),
            updated_at: slab.updated_at,
        }
    }
}

/// Body of `POST /admin/allotments`: credit tokens without a payment.
///
/// Supplying a `receipt` makes the call idempotent on that receipt.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManualAllotmentRequest {
    /// Owner of the agent
    pub username: String,
    pub agent_id: String,
    pub model_name: String,
    pub tokens: i64,
    #[serde(default)]
    pub receipt: Option<String>,
}
