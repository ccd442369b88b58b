//! Razorpay payment provider implementation
//!
//! Talks to the Razorpay REST API with basic auth (`key_id:key_secret`). Order amounts are
//! sent in paise. Checkout signatures are `hex(HMAC-SHA256(order_id|payment_id, key_secret))`
//! and webhooks carry `hex(HMAC-SHA256(body, webhook_secret))` in `X-Razorpay-Signature`.

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};

use crate::billing::money::to_minor_units;
use crate::config::RazorpayConfig;
use crate::payment_providers::{
    GatewayOrder, GatewayOrderRequest, PaymentError, PaymentLookup, PaymentProvider, PaymentState, PaymentStatusReport,
    Result, WebhookEvent, verify_hmac_sha256_hex,
};

pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";

#[derive(Debug, Serialize)]
struct CreateOrderBody<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
    notes: &'a BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RazorpayPayment {
    id: String,
    status: String,
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    amount: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PaymentCollection {
    #[serde(default)]
    items: Vec<RazorpayPayment>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

fn payment_state(status: &str) -> PaymentState {
    match status {
        "captured" => PaymentState::Captured,
        "created" | "authorized" => PaymentState::Pending,
        "failed" => PaymentState::Failed,
        other => PaymentState::Other(other.to_string()),
    }
}

impl From<RazorpayPayment> for PaymentStatusReport {
    fn from(payment: RazorpayPayment) -> Self {
        Self {
            state: payment_state(&payment.status),
            payment_id: Some(payment.id),
            order_id: payment.order_id,
            method: payment.method,
            amount: payment.amount,
        }
    }
}

/// Summarise every payment attempt against an order. A captured attempt wins.
fn summarise_order_payments(order_id: &str, payments: Vec<RazorpayPayment>) -> PaymentStatusReport {
    if let Some(captured) = payments.iter().find(|p| p.status == "captured") {
        return captured.clone().into();
    }
    if let Some(pending) = payments.iter().find(|p| matches!(payment_state(&p.status), PaymentState::Pending)) {
        return pending.clone().into();
    }
    match payments.into_iter().next() {
        Some(latest) => latest.into(),
        None => PaymentStatusReport {
            state: PaymentState::Pending,
            payment_id: None,
            order_id: Some(order_id.to_string()),
            method: None,
            amount: None,
        },
    }
}

pub struct RazorpayProvider {
    client: reqwest::Client,
    config: RazorpayConfig,
}

impl RazorpayProvider {
    pub fn new(config: RazorpayConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.as_str().trim_end_matches('/'), path)
    }

    async fn send<T: serde::de::DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorEnvelope>(&body)
                .ok()
                .and_then(|e| match (e.error.code, e.error.description) {
                    (Some(code), Some(description)) => Some(format!("{code}: {description}")),
                    (_, description) => description,
                })
                .unwrap_or(body);
            warn!(%status, "Razorpay request failed");
            return Err(PaymentError::ProviderApi(format!("{status}: {detail}")));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| PaymentError::InvalidData(format!("unexpected Razorpay response: {e}")))
    }
}

#[async_trait]
impl PaymentProvider for RazorpayProvider {
    #[instrument(skip(self, request), fields(receipt = %request.receipt, amount = %request.amount), err)]
    async fn create_order(&self, request: &GatewayOrderRequest) -> Result<GatewayOrder> {
        let amount = to_minor_units(request.amount)
            .filter(|paise| *paise > 0)
            .ok_or_else(|| PaymentError::InvalidData(format!("amount {} cannot be charged", request.amount)))?;

        let body = CreateOrderBody {
            amount,
            currency: &request.currency,
            receipt: &request.receipt,
            notes: &request.notes,
        };
        let order: GatewayOrder = self.send(self.client.post(self.url("orders")).json(&body)).await?;
        debug!(order_id = %order.id, "Razorpay order created");
        Ok(order)
    }

    #[instrument(skip(self), err)]
    async fn fetch_status(&self, lookup: PaymentLookup<'_>) -> Result<PaymentStatusReport> {
        match lookup {
            PaymentLookup::Order(order_id) => {
                let collection: PaymentCollection = self
                    .send(self.client.get(self.url(&format!("orders/{order_id}/payments"))))
                    .await?;
                Ok(summarise_order_payments(order_id, collection.items))
            }
            PaymentLookup::Payment(payment_id) => {
                let payment: RazorpayPayment = self.send(self.client.get(self.url(&format!("payments/{payment_id}")))).await?;
                Ok(payment.into())
            }
        }
    }

    fn verify_payment_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        verify_hmac_sha256_hex(&self.config.key_secret, &format!("{order_id}|{payment_id}"), signature)
    }

    async fn validate_webhook(&self, headers: &HeaderMap, body: &str) -> Result<Option<WebhookEvent>> {
        let Some(secret) = self.config.webhook_secret.as_deref() else {
            return Ok(None);
        };

        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(PaymentError::InvalidSignature)?;
        if !verify_hmac_sha256_hex(secret, body, signature) {
            return Err(PaymentError::InvalidSignature);
        }

        let event: Value =
            serde_json::from_str(body).map_err(|e| PaymentError::InvalidData(format!("webhook body is not JSON: {e}")))?;
        let event_type = event
            .get("event")
            .and_then(Value::as_str)
            .ok_or_else(|| PaymentError::InvalidData("webhook has no event type".to_string()))?
            .to_string();

        let payment = event.pointer("/payload/payment/entity");
        let order_id = payment
            .and_then(|p| p.get("order_id"))
            .or_else(|| event.pointer("/payload/order/entity/id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let payment_id = payment.and_then(|p| p.get("id")).and_then(Value::as_str).map(str::to_string);

        Ok(Some(WebhookEvent {
            event_type,
            order_id,
            payment_id,
        }))
    }
}
