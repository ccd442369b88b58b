//! Payment gateway abstraction layer
//!
//! The `PaymentProvider` trait covers what the checkout flow needs from a gateway: create
//! an order for an amount, ask whether it has been paid, and authenticate callbacks.
//! Amounts cross this boundary in major units; providers convert to whatever their API
//! expects.

use async_trait::async_trait;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::config::PaymentConfig;

pub mod dummy;
pub mod razorpay;

type HmacSha256 = Hmac<Sha256>;

/// Create a payment provider from configuration
///
/// Adding a new provider requires adding a match arm here.
pub fn create_provider(config: PaymentConfig) -> Result<Arc<dyn PaymentProvider>> {
    let provider: Arc<dyn PaymentProvider> = match config {
        PaymentConfig::Razorpay(razorpay_config) => Arc::new(razorpay::RazorpayProvider::new(razorpay_config)?),
        PaymentConfig::Dummy(dummy_config) => Arc::new(dummy::DummyProvider::from(dummy_config)),
    };
    Ok(provider)
}

/// Result type for payment provider operations
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Errors that can occur while talking to a payment gateway
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Payment provider API error: {0}")]
    ProviderApi(String),

    #[error("Payment provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid payment data: {0}")]
    InvalidData(String),

    #[error("Invalid signature")]
    InvalidSignature,
}

/// Order to be created at the gateway
#[derive(Debug, Clone)]
pub struct GatewayOrderRequest {
    /// Amount in major units (rupees)
    pub amount: Decimal,
    pub currency: String,
    pub receipt: String,
    pub notes: BTreeMap<String, String>,
}

/// Order as returned by the gateway
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct GatewayOrder {
    pub id: String,
    #[serde(default)]
    pub entity: String,
    /// Amount in minor units (paise)
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub receipt: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub created_at: i64,
}

/// How to find the payment being confirmed
#[derive(Debug, Clone, Copy)]
pub enum PaymentLookup<'a> {
    Order(&'a str),
    Payment(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentState {
    Captured,
    /// Created or authorized but not yet captured
    Pending,
    Failed,
    Other(String),
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentState::Captured => write!(f, "captured"),
            PaymentState::Pending => write!(f, "pending"),
            PaymentState::Failed => write!(f, "failed"),
            PaymentState::Other(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentStatusReport {
    pub state: PaymentState,
    pub payment_id: Option<String>,
    pub order_id: Option<String>,
    pub method: Option<String>,
    /// Minor units
    pub amount: Option<i64>,
}

/// A gateway callback that passed authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    /// e.g. "payment.captured"
    pub event_type: String,
    pub order_id: Option<String>,
    pub payment_id: Option<String>,
}

/// Abstract payment gateway interface
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Create an order the customer can pay against
    async fn create_order(&self, request: &GatewayOrderRequest) -> Result<GatewayOrder>;

    /// Current state of a payment, looked up by gateway order id or payment id
    async fn fetch_status(&self, lookup: PaymentLookup<'_>) -> Result<PaymentStatusReport>;

    /// Check the checkout signature returned to the client after payment
    fn verify_payment_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool;

    /// Authenticate and parse a gateway callback.
    ///
    /// Returns None if this provider doesn't support webhooks.
    async fn validate_webhook(&self, headers: &HeaderMap, body: &str) -> Result<Option<WebhookEvent>>;
}

/// Lowercase hex HMAC-SHA256 of `payload`
pub fn hmac_sha256_hex(secret: &str, payload: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex signature against `payload`
pub fn verify_hmac_sha256_hex(secret: &str, payload: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload.as_bytes());
    mac.verify_slice(&expected).is_ok()
}
