//! Database models for the per-user order ledger.

use crate::types::OrderRowId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order lifecycle stored as TEXT in database
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Paid,
}

/// One purchase attempt in a user's ledger
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct Order {
    pub id: OrderRowId,
    pub username: String,
    /// External payment-order id; empty until the gateway order exists
    pub order_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub receipt: String,
    /// Server-side audit copy of the verified bill
    pub billing_snapshot: serde_json::Value,
    pub payment_created_at: DateTime<Utc>,
    pub fulfillment: bool,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Database request for appending a pending order
#[derive(Debug, Clone)]
pub struct OrderCreateDBRequest {
    pub username: String,
    pub receipt: String,
    pub amount: Decimal,
    pub currency: String,
    pub billing_snapshot: serde_json::Value,
}
