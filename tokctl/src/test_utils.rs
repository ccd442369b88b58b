//! Shared fixtures for unit and HTTP tests.
//!
//! Everything runs against [`MemoryStore`], seeded with a small pricing catalog:
//!
//! | model          | price/token | available        |
//! |----------------|-------------|------------------|
//! | `gpt-4`        | 0.01 INR    | for another year |
//! | `claude-3`     | 0.02 INR    | for another year |
//! | `tiny-model`   | 0.0001 INR  | for another year |
//! | `legacy-model` | 0.01 INR    | expired          |

use crate::allotment::TokenAllotmentEngine;
use crate::api::models::users::CurrentUser;
use crate::auth::session::create_session_token;
use crate::billing::PurchaseVerifier;
use crate::checkout::Checkout;
use crate::config::Config;
use crate::db::handlers::Repositories;
use crate::db::memory::MemoryStore;
use crate::db::models::{
    discounts::{BaseDiscountSlab, DiscountSlabLevel, SlabStatus},
    pricing::PricingModel,
    promotions::{ALL_PRODUCTS, Coupon, Offer, OfferStatus},
};
use crate::payment_providers::{
    GatewayOrder, GatewayOrderRequest, PaymentError, PaymentLookup, PaymentProvider, PaymentState, PaymentStatusReport,
    Result as PaymentResult, WebhookEvent, hmac_sha256_hex, verify_hmac_sha256_hex,
};
use crate::types::DiscountType;
use crate::{AppState, build_router};
use async_trait::async_trait;
use axum::http::HeaderMap;
use axum_test::TestServer;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const TEST_SECRET_KEY: &str = "test-secret-key-for-testing-only";

/// Secret [`ScriptedProvider`] signs checkout callbacks with
pub const SCRIPTED_KEY_SECRET: &str = "scripted-key-secret";

pub fn install_crypto_provider() {
    // Another test may have installed it already
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

pub fn create_test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        secret_key: Some(TEST_SECRET_KEY.to_string()),
        enable_metrics: false,
        ..Default::default()
    }
}

fn model(name: &str, provider: &str, price: &str, available_for: Duration) -> PricingModel {
    PricingModel {
        model_name: name.to_string(),
        provider: provider.to_string(),
        price_per_token: price.parse().expect("valid price"),
        currency: "INR".to_string(),
        available_till: Utc::now() + available_for,
    }
}

pub fn test_catalog() -> Vec<PricingModel> {
    vec![
        model("gpt-4", "openai", "0.01", Duration::days(365)),
        model("claude-3", "anthropic", "0.02", Duration::days(365)),
        model("tiny-model", "local", "0.0001", Duration::days(365)),
        model("legacy-model", "openai", "0.01", Duration::days(-1)),
    ]
}

pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub repos: Repositories,
    pub config: Config,
}

impl TestContext {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::with_models(test_catalog()));
        Self {
            repos: Repositories::in_memory(store.clone()),
            store,
            config: create_test_config(),
        }
    }

    pub fn engine(&self) -> TokenAllotmentEngine {
        TokenAllotmentEngine::new(&self.repos, self.config.purchase.max_tokens_per_allotment)
    }

    pub fn verifier(&self) -> PurchaseVerifier {
        PurchaseVerifier::new(&self.repos, self.config.purchase.max_tokens_per_order)
    }

    pub fn checkout(&self, provider: Arc<ScriptedProvider>) -> Checkout {
        let provider: Arc<dyn PaymentProvider> = provider;
        Checkout::new(&self.repos, Some(provider), &self.config.purchase)
    }

    /// Application state without a payment provider
    pub fn state(&self) -> AppState {
        AppState::builder()
            .config(self.config.clone())
            .repos(self.repos.clone())
            .build()
    }

    pub fn state_with(&self, provider: Arc<dyn PaymentProvider>) -> AppState {
        AppState::builder()
            .config(self.config.clone())
            .repos(self.repos.clone())
            .payments(provider)
            .build()
    }

    pub fn server(&self, provider: Arc<dyn PaymentProvider>) -> TestServer {
        let router = build_router(&self.state_with(provider)).expect("router builds");
        TestServer::new(router).expect("Failed to create test server")
    }
}

pub fn session_token(config: &Config, username: &str, is_admin: bool) -> String {
    let user = CurrentUser {
        username: username.to_string(),
        is_admin,
    };
    create_session_token(&user, config).expect("token mints")
}

/// `Authorization` header value for `username`
pub fn bearer(config: &Config, username: &str, is_admin: bool) -> String {
    format!("Bearer {}", session_token(config, username, is_admin))
}

pub async fn seed_agent(repos: &Repositories, agent_id: &str, username: &str) {
    repos.agents.create_account(agent_id, username).await.expect("agent created");
}

pub async fn seed_coupon(
    repos: &Repositories,
    username: &str,
    code: &str,
    discount_type: DiscountType,
    value: &str,
    min_order_value: &str,
) -> Coupon {
    repos
        .coupons
        .insert_coupon(&Coupon {
            username: username.to_string(),
            coupon_code: code.to_string(),
            used: false,
            min_order_value: min_order_value.parse().expect("valid minimum"),
            discount_type,
            discount_value: value.parse().expect("valid value"),
            max_discount_amount: None,
            created_at: Utc::now(),
        })
        .await
        .expect("coupon created")
}

/// An active offer on every model, live for a day either side of now
pub async fn seed_offer(repos: &Repositories, code: &str, discount_type: DiscountType, value: &str) -> Offer {
    let now = Utc::now();
    repos
        .offers
        .insert_offer(&Offer {
            offer_id: Uuid::new_v4(),
            offer_code: Some(code.to_string()),
            title: format!("{code} offer"),
            discount_type,
            discount_value: value.parse().expect("valid value"),
            max_discount_amount: None,
            offer_type: "promotional".to_string(),
            applicable_to: vec!["all_users".to_string()],
            min_purchase_amount: None,
            applicable_products: vec![ALL_PRODUCTS.to_string()],
            usage_limit: None,
            usage_limit_per_user: None,
            global_used_count: 0,
            start_date: now - Duration::days(1),
            end_date: now + Duration::days(1),
            status: OfferStatus::Active,
        })
        .await
        .expect("offer created")
}

/// Active slab with a single open-ended 10% level from 0
pub async fn seed_slab_ten_percent(repos: &Repositories) {
    repos
        .slabs
        .replace_slab(&BaseDiscountSlab {
            status: SlabStatus::Active,
            levels: vec![DiscountSlabLevel {
                min_order_value: "0".parse().expect("valid"),
                max_order_value: None,
                discount_type: DiscountType::Percentage,
                discount_value: "10".parse().expect("valid"),
            }],
            updated_at: Utc::now(),
        })
        .await
        .expect("slab stored");
}

/// In-process gateway whose payment states are set by the test.
///
/// Orders are captured unless told otherwise. Payment ids are `pay_<order id>`.
#[derive(Default)]
pub struct ScriptedProvider {
    fail_order_creation: bool,
    created: Mutex<Vec<GatewayOrderRequest>>,
    states: DashMap<String, PaymentState>,
}

impl ScriptedProvider {
    pub fn failing_order_creation() -> Self {
        Self {
            fail_order_creation: true,
            ..Default::default()
        }
    }

    pub fn created_orders(&self) -> Vec<GatewayOrderRequest> {
        self.created.lock().expect("lock").clone()
    }

    pub fn set_state(&self, order_id: &str, state: PaymentState) {
        self.states.insert(order_id.to_string(), state);
    }

    pub fn payment_id_for(order_id: &str) -> String {
        format!("pay_{order_id}")
    }

    /// Signature the gateway's checkout would hand the client
    pub fn sign(order_id: &str, payment_id: &str) -> String {
        hmac_sha256_hex(SCRIPTED_KEY_SECRET, &format!("{order_id}|{payment_id}")).expect("hmac")
    }

    fn state_of(&self, order_id: &str) -> PaymentState {
        self.states
            .get(order_id)
            .map(|s| s.clone())
            .unwrap_or(PaymentState::Captured)
    }
}

#[async_trait]
impl PaymentProvider for ScriptedProvider {
    async fn create_order(&self, request: &GatewayOrderRequest) -> PaymentResult<GatewayOrder> {
        if self.fail_order_creation {
            return Err(PaymentError::ProviderApi("scripted outage".to_string()));
        }
        let mut created = self.created.lock().expect("lock");
        created.push(request.clone());
        Ok(GatewayOrder {
            id: format!("order_test_{}", created.len()),
            entity: "order".to_string(),
            amount: crate::billing::money::to_minor_units(request.amount).expect("chargeable amount"),
            currency: request.currency.clone(),
            receipt: Some(request.receipt.clone()),
            status: "created".to_string(),
            created_at: Utc::now().timestamp(),
        })
    }

    async fn fetch_status(&self, lookup: PaymentLookup<'_>) -> PaymentResult<PaymentStatusReport> {
        let order_id = match lookup {
            PaymentLookup::Order(order_id) => order_id.to_string(),
            PaymentLookup::Payment(payment_id) => payment_id
                .strip_prefix("pay_")
                .ok_or_else(|| PaymentError::ProviderApi(format!("unknown payment {payment_id}")))?
                .to_string(),
        };
        Ok(PaymentStatusReport {
            state: self.state_of(&order_id),
            payment_id: Some(Self::payment_id_for(&order_id)),
            order_id: Some(order_id),
            method: Some("upi".to_string()),
            amount: None,
        })
    }

    fn verify_payment_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        verify_hmac_sha256_hex(SCRIPTED_KEY_SECRET, &format!("{order_id}|{payment_id}"), signature)
    }

    async fn validate_webhook(&self, _headers: &HeaderMap, _body: &str) -> PaymentResult<Option<WebhookEvent>> {
        Ok(None)
    }
}
