//! Dummy payment provider implementation
//!
//! Every order is immediately "captured" without contacting any gateway. Useful for local
//! development and demos.

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::Utc;

use crate::billing::money::to_minor_units;
use crate::config::DummyConfig;
use crate::payment_providers::{
    GatewayOrder, GatewayOrderRequest, PaymentError, PaymentLookup, PaymentProvider, PaymentState, PaymentStatusReport,
    Result, WebhookEvent,
};

/// Dummy payment provider that reports every payment as captured
pub struct DummyProvider {
    fail_order_creation: bool,
}

impl From<DummyConfig> for DummyProvider {
    fn from(config: DummyConfig) -> Self {
        Self {
            fail_order_creation: config.fail_order_creation,
        }
    }
}

#[async_trait]
impl PaymentProvider for DummyProvider {
    async fn create_order(&self, request: &GatewayOrderRequest) -> Result<GatewayOrder> {
        if self.fail_order_creation {
            return Err(PaymentError::ProviderApi("dummy provider configured to fail".to_string()));
        }
        let amount = to_minor_units(request.amount)
            .ok_or_else(|| PaymentError::InvalidData(format!("amount {} cannot be charged", request.amount)))?;

        let id = format!("order_dummy_{}", uuid::Uuid::new_v4().simple());
        tracing::info!("Dummy provider created order {} for receipt {}", id, request.receipt);

        Ok(GatewayOrder {
            id,
            entity: "order".to_string(),
            amount,
            currency: request.currency.clone(),
            receipt: Some(request.receipt.clone()),
            status: "created".to_string(),
            created_at: Utc::now().timestamp(),
        })
    }

    async fn fetch_status(&self, lookup: PaymentLookup<'_>) -> Result<PaymentStatusReport> {
        let (order_id, payment_id) = match lookup {
            PaymentLookup::Order(order_id) => (Some(order_id.to_string()), format!("pay_dummy_{order_id}")),
            PaymentLookup::Payment(payment_id) => (None, payment_id.to_string()),
        };
        Ok(PaymentStatusReport {
            state: PaymentState::Captured,
            payment_id: Some(payment_id),
            order_id,
            method: Some("dummy".to_string()),
            amount: None,
        })
    }

    fn verify_payment_signature(&self, _order_id: &str, _payment_id: &str, _signature: &str) -> bool {
        true
    }

    async fn validate_webhook(&self, _headers: &HeaderMap, _body: &str) -> Result<Option<WebhookEvent>> {
        Ok(None)
    }
}
