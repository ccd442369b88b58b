use super::agents::AllotmentView;
use crate::billing::money::{round2, round4};
use crate::billing::{PromoKind, PurchaseQuote, PurchaseRequest};
use crate::db::models::discounts::DiscountSlabLevel;
use crate::db::models::orders::{Order, OrderStatus};
use crate::payment_providers::GatewayOrder;
use crate::types::DiscountType;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A purchase as submitted by the client. The username always comes from the session.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    /// Number of tokens to buy
    pub tokens: i64,
    pub agent_id: String,
    pub model_name: String,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub offer_code: Option<String>,
}

impl CreateOrderRequest {
    pub fn into_purchase(self, username: &str) -> PurchaseRequest {
        PurchaseRequest {
            username: username.to_string(),
            tokens: self.tokens,
            agent_id: self.agent_id,
            model_name: self.model_name,
            coupon_code: self.coupon_code,
            offer_code: self.offer_code,
        }
    }
}

/// Identifiers returned by the gateway's checkout once the customer has paid.
///
/// At least one of the two ids is required; the signature is checked when all three are present.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ConfirmPaymentRequest {
    #[serde(default)]
    pub razorpay_payment_id: Option<String>,
    #[serde(default)]
    pub razorpay_order_id: Option<String>,
    #[serde(default)]
    pub razorpay_signature: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SlabLevelView {
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub min_order_value: Decimal,
    #[serde(with = "rust_decimal::serde::float_option", default)]
    #[schema(value_type = Option<f64>)]
    pub max_order_value: Option<Decimal>,
    pub discount_type: DiscountType,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub discount_value: Decimal,
}

impl From<&DiscountSlabLevel> for SlabLevelView {
    fn from(level: &DiscountSlabLevel) -> Self {
        Self {
            min_order_value: level.min_order_value,
            max_order_value: level.max_order_value,
            discount_type: level.discount_type,
            discount_value: level.discount_value,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BaseDiscountView {
    pub applied: bool,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub amount: Decimal,
    pub level: Option<SlabLevelView>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PromoView {
    #[serde(rename = "type")]
    pub kind: PromoKind,
    pub code: String,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub discount_amount: Decimal,
}

/// Itemised bill for a purchase
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BillingView {
    pub username: String,
    pub agent_id: String,
    pub model_name: String,
    pub provider: String,
    pub currency: String,
    pub tokens: i64,
    /// Rounded to 4 decimal places
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub per_token_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub base_amount: Decimal,
    pub base_discount: BaseDiscountView,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub price_after_base_discount: Decimal,
    pub promo: Option<PromoView>,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub total_discount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub final_payable: Decimal,
}

impl From<&PurchaseQuote> for BillingView {
    fn from(quote: &PurchaseQuote) -> Self {
        Self {
            username: quote.username.clone(),
            agent_id: quote.agent_id.clone(),
            model_name: quote.model_name.clone(),
            provider: quote.provider.clone(),
            currency: quote.currency.clone(),
            tokens: quote.tokens,
            per_token_price: round4(quote.per_token_price),
            base_amount: round2(quote.base_amount),
            base_discount: BaseDiscountView {
                applied: quote.base_discount.applied,
                amount: round2(quote.base_discount.amount),
                level: quote.base_discount.level.as_ref().map(SlabLevelView::from),
            },
            price_after_base_discount: round2(quote.price_after_base_discount),
            promo: quote.promo.as_ref().map(|promo| PromoView {
                kind: promo.kind,
                code: promo.code.clone(),
                discount_amount: round2(promo.discount_amount),
            }),
            total_discount: round2(quote.total_discount),
            final_payable: round2(quote.final_payable),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct VerifyPurchaseResponse {
    pub success: bool,
    pub billing: BillingView,
}

/// Result of `POST /orders`.
///
/// Carries the gateway order when payment is due, or the allotment when nothing was payable.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub razorpay_order: Option<GatewayOrder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub receipt: String,
    pub billing: BillingView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allotment: Option<AllotmentView>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentResponse {
    pub success: bool,
    pub message: String,
    pub order_id: String,
    pub receipt: String,
    /// Absent when the order had already been fulfilled
    pub allotment: Option<AllotmentView>,
}

/// One entry of the caller's order ledger
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub order_id: String,
    pub receipt: String,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub amount: Decimal,
    pub currency: String,
    #[schema(value_type = String)]
    pub status: OrderStatus,
    pub fulfillment: bool,
    #[schema(value_type = Object)]
    pub billing: serde_json::Value,
    pub payment_created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Order> for OrderView {
    fn from(order: Order) -> Self {
        Self {
            order_id: order.order_id,
            receipt: order.receipt,
            amount: order.amount,
            currency: order.currency,
            status: order.status,
            fulfillment: order.fulfillment,
            billing: order.billing_snapshot,
            payment_created_at: order.payment_created_at,
            updated_at: order.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ListOrdersResponse {
    pub success: bool,
    pub orders: Vec<OrderView>,
}
