//! Purchase endpoints: price preview, order creation, payment confirmation, the order
//! ledger and the gateway webhook.

use crate::{
    AppState,
    api::{
        json::ApiJson,
        models::{
            orders::{
                BillingView, ConfirmPaymentRequest, ConfirmPaymentResponse, CreateOrderRequest, CreateOrderResponse,
                ListOrdersResponse, OrderView, VerifyPurchaseResponse,
            },
            users::CurrentUser,
        },
    },
    checkout::{CheckoutPayment, PaymentConfirmation},
    errors::{ErrorBody, Result},
};
use axum::{
    Json,
    extract::State,
    http::HeaderMap,
};
use serde::Serialize;
use tracing::info;
use utoipa::ToSchema;

/// Price a purchase without creating anything
#[utoipa::path(
    post,
    path = "/verify_purchase",
    tag = "payments",
    summary = "Preview the bill for a token purchase",
    request_body = CreateOrderRequest,
    responses(
        (status = 200, description = "Itemised bill", body = VerifyPurchaseResponse),
        (status = 400, description = "Invalid purchase", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 403, description = "Agent not found or access denied", body = ErrorBody),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all, fields(username = %current_user.username))]
pub async fn verify_purchase(
    State(state): State<AppState>,
    current_user: CurrentUser,
    ApiJson(request): ApiJson<CreateOrderRequest>,
) -> Result<Json<VerifyPurchaseResponse>> {
    let quote = state.checkout().quote(&request.into_purchase(&current_user.username)).await?;
    Ok(Json(VerifyPurchaseResponse {
        success: true,
        billing: BillingView::from(&quote),
    }))
}

/// Create a pending order and the matching gateway order
#[utoipa::path(
    post,
    path = "/create_order",
    tag = "payments",
    summary = "Create an order for a token purchase",
    description = "Verifies the purchase, records a pending order and creates the gateway order. \
                   When nothing is payable the tokens are credited immediately and no gateway order is created.",
    request_body = CreateOrderRequest,
    responses(
        (status = 200, description = "Order created", body = CreateOrderResponse),
        (status = 400, description = "Invalid purchase", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 403, description = "Agent not found or access denied", body = ErrorBody),
        (status = 500, description = "Gateway or storage failure", body = ErrorBody),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all, fields(username = %current_user.username))]
pub async fn create_order(
    State(state): State<AppState>,
    current_user: CurrentUser,
    ApiJson(request): ApiJson<CreateOrderRequest>,
) -> Result<Json<CreateOrderResponse>> {
    let created = state
        .checkout()
        .create_order(&request.into_purchase(&current_user.username))
        .await?;

    let billing = BillingView::from(&created.quote);
    let response = match created.payment {
        CheckoutPayment::Gateway(order) => CreateOrderResponse {
            success: true,
            razorpay_order: Some(order),
            message: None,
            receipt: created.receipt,
            billing,
            allotment: None,
        },
        CheckoutPayment::Waived(allotment) => CreateOrderResponse {
            success: true,
            razorpay_order: None,
            message: Some("Nothing to pay. Tokens have been credited.".to_string()),
            receipt: created.receipt,
            billing,
            allotment: Some(allotment.into()),
        },
    };
    Ok(Json(response))
}

/// Confirm a captured payment and credit the purchased tokens
#[utoipa::path(
    post,
    path = "/confirm_payment",
    tag = "payments",
    summary = "Confirm a payment",
    description = "Checks the payment with the gateway and credits the tokens. Confirming an order twice credits once.",
    request_body = ConfirmPaymentRequest,
    responses(
        (status = 200, description = "Payment confirmed", body = ConfirmPaymentResponse),
        (status = 400, description = "Payment not captured or invalid", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 404, description = "Order not found", body = ErrorBody),
        (status = 500, description = "Paid but not credited", body = ErrorBody),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all, fields(username = %current_user.username))]
pub async fn confirm_payment(
    State(state): State<AppState>,
    current_user: CurrentUser,
    ApiJson(request): ApiJson<ConfirmPaymentRequest>,
) -> Result<Json<ConfirmPaymentResponse>> {
    let confirmation = PaymentConfirmation {
        order_id: request.razorpay_order_id,
        payment_id: request.razorpay_payment_id,
        signature: request.razorpay_signature,
    };
    let fulfilment = state
        .checkout()
        .confirm_payment(&current_user.username, &confirmation)
        .await?;

    let message = if fulfilment.already_fulfilled() {
        "Payment already processed"
    } else {
        "Payment verified and tokens credited"
    };
    Ok(Json(ConfirmPaymentResponse {
        success: true,
        message: message.to_string(),
        order_id: fulfilment.order_id,
        receipt: fulfilment.receipt,
        allotment: fulfilment.allotment.map(Into::into),
    }))
}

/// The caller's orders, newest first
#[utoipa::path(
    get,
    path = "/orders",
    tag = "payments",
    summary = "List my orders",
    responses(
        (status = 200, description = "Order ledger", body = ListOrdersResponse),
        (status = 401, description = "Unauthorized", body = ErrorBody),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all, fields(username = %current_user.username))]
pub async fn list_orders(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<ListOrdersResponse>> {
    let orders = state.repos.orders.list_for_user(&current_user.username).await?;
    Ok(Json(ListOrdersResponse {
        success: true,
        orders: orders.into_iter().map(OrderView::from).collect(),
    }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub success: bool,
}

/// Gateway callback. Settlement events fulfil the order; everything else is acknowledged.
#[utoipa::path(
    post,
    path = "/webhooks/razorpay",
    tag = "payments",
    summary = "Razorpay webhook",
    description = "Requires a valid X-Razorpay-Signature. Redelivered events are acknowledged without crediting again.",
    request_body(content = String, content_type = "application/json"),
    responses(
        (status = 200, description = "Event processed", body = WebhookAck),
        (status = 400, description = "Malformed event", body = ErrorBody),
        (status = 401, description = "Invalid signature", body = ErrorBody),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn razorpay_webhook(State(state): State<AppState>, headers: HeaderMap, body: String) -> Result<Json<WebhookAck>> {
    if let Some(fulfilment) = state.checkout().handle_webhook(&headers, &body).await? {
        info!(
            receipt = %fulfilment.receipt,
            already_fulfilled = fulfilment.already_fulfilled(),
            "Webhook settled order"
        );
    }
    Ok(Json(WebhookAck { success: true }))
}

#[cfg(test)]
mod tests {
    use crate::config::RazorpayConfig;
    use crate::payment_providers::razorpay::{RazorpayProvider, SIGNATURE_HEADER};
    use crate::payment_providers::{PaymentProvider, PaymentState, hmac_sha256_hex};
    use crate::test_utils::{
        ScriptedProvider, TestContext, bearer, install_crypto_provider, seed_agent, seed_coupon, seed_slab_ten_percent,
    };
    use crate::types::DiscountType;
    use axum::http::StatusCode;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;

    fn scripted() -> (Arc<ScriptedProvider>, Arc<dyn PaymentProvider>) {
        let provider = Arc::new(ScriptedProvider::default());
        let dynamic: Arc<dyn PaymentProvider> = provider.clone();
        (provider, dynamic)
    }

    fn purchase(tokens: i64) -> Value {
        json!({ "tokens": tokens, "agentId": "agent-1", "modelName": "gpt-4" })
    }

    #[test_log::test(tokio::test)]
    async fn test_create_and_confirm_over_http() {
        let ctx = TestContext::new();
        seed_agent(&ctx.repos, "agent-1", "alice").await;
        seed_slab_ten_percent(&ctx.repos).await;
        let (_, provider) = scripted();
        let server = ctx.server(provider);
        let auth = bearer(&ctx.config, "alice", false);

        let created = server
            .post("/create_order")
            .add_header("authorization", &auth)
            .json(&purchase(1000))
            .await;
        created.assert_status_ok();
        let body: Value = created.json();
        assert_eq!(body["success"], true);
        assert_eq!(body["billing"]["baseAmount"], json!(10.0));
        assert_eq!(body["billing"]["baseDiscount"]["applied"], true);
        assert_eq!(body["billing"]["finalPayable"], json!(9.0));
        assert_eq!(body["razorpayOrder"]["amount"], 900);
        let order_id = body["razorpayOrder"]["id"].as_str().unwrap().to_string();
        let receipt = body["receipt"].as_str().unwrap().to_string();
        assert!(receipt.starts_with(&ctx.config.purchase.receipt_prefix));
        assert!(receipt.len() <= ctx.config.purchase.receipt_max_length);

        let payment_id = ScriptedProvider::payment_id_for(&order_id);
        let confirmed = server
            .post("/confirm_payment")
            .add_header("authorization", &auth)
            .json(&json!({
                "razorpay_order_id": order_id,
                "razorpay_payment_id": payment_id,
                "razorpay_signature": ScriptedProvider::sign(&order_id, &payment_id),
            }))
            .await;
        confirmed.assert_status_ok();
        let body: Value = confirmed.json();
        assert_eq!(body["orderId"], order_id.as_str());
        assert_eq!(body["allotment"]["balance"]["availableTokens"], 1000);
        assert_eq!(body["allotment"]["metadata"]["receipt"], receipt.as_str());

        let again = server
            .post("/confirm_payment")
            .add_header("authorization", &auth)
            .json(&json!({ "razorpay_order_id": order_id }))
            .await;
        again.assert_status_ok();
        let body: Value = again.json();
        assert_eq!(body["message"], "Payment already processed");
        assert_eq!(body["allotment"], Value::Null);

        let orders: Value = server.get("/orders").add_header("authorization", &auth).await.json();
        assert_eq!(orders["orders"].as_array().unwrap().len(), 1);
        assert_eq!(orders["orders"][0]["status"], "paid");
        assert_eq!(orders["orders"][0]["fulfillment"], true);
    }

    #[tokio::test]
    async fn test_verify_purchase_has_no_side_effects() {
        let ctx = TestContext::new();
        seed_agent(&ctx.repos, "agent-1", "alice").await;
        seed_coupon(&ctx.repos, "alice", "SAVE10", DiscountType::Percentage, "10", "0").await;
        let (provider, dynamic) = scripted();
        let server = ctx.server(dynamic);
        let auth = bearer(&ctx.config, "alice", false);

        let mut body = purchase(1000);
        body["couponCode"] = json!("SAVE10");
        let response = server.post("/verify_purchase").add_header("authorization", &auth).json(&body).await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["billing"]["promo"]["type"], "coupon");
        assert_eq!(body["billing"]["promo"]["discountAmount"], json!(1.0));
        assert_eq!(body["billing"]["finalPayable"], json!(9.0));

        assert!(provider.created_orders().is_empty());
        assert!(ctx.repos.orders.list_for_user("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purchase_errors() {
        let ctx = TestContext::new();
        seed_agent(&ctx.repos, "agent-1", "alice").await;
        seed_agent(&ctx.repos, "agent-2", "bob").await;
        let (_, provider) = scripted();
        let server = ctx.server(provider);
        let auth = bearer(&ctx.config, "alice", false);

        server
            .post("/create_order")
            .json(&purchase(10))
            .await
            .assert_status_unauthorized();

        let zero = server.post("/create_order").add_header("authorization", &auth).json(&purchase(0)).await;
        zero.assert_status_bad_request();
        assert_eq!(zero.json::<Value>()["success"], false);

        let both = server
            .post("/create_order")
            .add_header("authorization", &auth)
            .json(&json!({
                "tokens": 10, "agentId": "agent-1", "modelName": "gpt-4",
                "couponCode": "A", "offerCode": "B"
            }))
            .await;
        both.assert_status_bad_request();

        let foreign = server
            .post("/create_order")
            .add_header("authorization", &auth)
            .json(&json!({ "tokens": 10, "agentId": "agent-2", "modelName": "gpt-4" }))
            .await;
        foreign.assert_status(StatusCode::FORBIDDEN);
        let missing = server
            .post("/create_order")
            .add_header("authorization", &auth)
            .json(&json!({ "tokens": 10, "agentId": "agent-404", "modelName": "gpt-4" }))
            .await;
        missing.assert_status(StatusCode::FORBIDDEN);
        assert_eq!(foreign.json::<Value>(), missing.json::<Value>());

        let malformed = server
            .post("/create_order")
            .add_header("authorization", &auth)
            .add_header("Content-Type", "application/json")
            .bytes("{\"tokens\": \"lots\"".as_bytes().into())
            .await;
        malformed.assert_status_bad_request();
        assert_eq!(malformed.json::<Value>()["success"], false);
    }

    #[tokio::test]
    async fn test_uncaptured_payment_rejected() {
        let ctx = TestContext::new();
        seed_agent(&ctx.repos, "agent-1", "alice").await;
        let (provider, dynamic) = scripted();
        let server = ctx.server(dynamic);
        let auth = bearer(&ctx.config, "alice", false);

        let body: Value = server
            .post("/create_order")
            .add_header("authorization", &auth)
            .json(&purchase(100))
            .await
            .json();
        let order_id = body["razorpayOrder"]["id"].as_str().unwrap().to_string();
        provider.set_state(&order_id, PaymentState::Pending);

        let response = server
            .post("/confirm_payment")
            .add_header("authorization", &auth)
            .json(&json!({ "razorpay_order_id": order_id }))
            .await;
        response.assert_status_bad_request();

        let account = ctx.repos.agents.get_account("agent-1").await.unwrap().unwrap();
        assert!(account.token_balances.is_empty());
    }

    fn razorpay_with_webhook_secret() -> Arc<dyn PaymentProvider> {
        install_crypto_provider();
        Arc::new(
            RazorpayProvider::new(RazorpayConfig {
                key_id: "rzp_test_key".to_string(),
                key_secret: "key_secret".to_string(),
                webhook_secret: Some("hook_secret".to_string()),
                base_url: "http://127.0.0.1:9".parse().unwrap(),
                timeout: Duration::from_secs(1),
            })
            .unwrap(),
        )
    }

    #[test_log::test(tokio::test)]
    async fn test_webhook_settles_order_once() {
        let ctx = TestContext::new();
        seed_agent(&ctx.repos, "agent-1", "alice").await;
        let (_, scripted_provider) = scripted();
        let checkout_server = ctx.server(scripted_provider);
        let auth = bearer(&ctx.config, "alice", false);

        let created: Value = checkout_server
            .post("/create_order")
            .add_header("authorization", &auth)
            .json(&purchase(500))
            .await
            .json();
        let order_id = created["razorpayOrder"]["id"].as_str().unwrap().to_string();

        let webhook_server = ctx.server(razorpay_with_webhook_secret());
        let event = json!({
            "event": "payment.captured",
            "payload": { "payment": { "entity": { "id": "pay_hook", "order_id": order_id } } }
        })
        .to_string();
        let signature = hmac_sha256_hex("hook_secret", &event).unwrap();

        for _ in 0..2 {
            let response = webhook_server
                .post("/webhooks/razorpay")
                .add_header(SIGNATURE_HEADER, &signature)
                .text(event.clone())
                .await;
            response.assert_status_ok();
            assert_eq!(response.json::<Value>()["success"], true);
        }

        let account = ctx.repos.agents.get_account("agent-1").await.unwrap().unwrap();
        assert_eq!(account.token_balances[0].available_tokens, 500);
        let orders = ctx.repos.orders.list_for_user("alice").await.unwrap();
        assert!(orders[0].fulfillment);

        let forged = webhook_server
            .post("/webhooks/razorpay")
            .add_header(SIGNATURE_HEADER, "deadbeef")
            .text(event)
            .await;
        forged.assert_status_unauthorized();
    }

    #[tokio::test]
    async fn test_webhook_ignores_other_events() {
        let ctx = TestContext::new();
        let server = ctx.server(razorpay_with_webhook_secret());
        let event = json!({ "event": "refund.created", "payload": {} }).to_string();
        let signature = hmac_sha256_hex("hook_secret", &event).unwrap();

        let response = server
            .post("/webhooks/razorpay")
            .add_header(SIGNATURE_HEADER, &signature)
            .text(event)
            .await;
        response.assert_status_ok();
    }
}
