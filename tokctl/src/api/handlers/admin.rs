use crate::{
    AppState,
    allotment::{AllotmentMetadata, AllotmentRequest},
    api::{
        json::ApiJson,
        models::{
            admin::{DiscountSlabResponse, DiscountSlabUpdate, ManualAllotmentRequest},
            agents::AllotmentView,
        },
    },
    auth::current_user::AdminUser,
    errors::{Error, ErrorBody, Result},
};
use axum::{Json, extract::State};
use chrono::Utc;
use tracing::info;

/// Replace the platform-wide base-discount slab
#[utoipa::path(
    put,
    path = "/admin/discount-slab",
    tag = "admin",
    summary = "Replace the base-discount slab",
    description = "Levels are validated before anything is stored: percentages up to 90, flat discounts up to 90% of \
                   the level's minimum order value, and no flat discount on a level starting at 0.",
    request_body = DiscountSlabUpdate,
    responses(
        (status = 200, description = "Slab stored", body = DiscountSlabResponse),
        (status = 400, description = "Invalid level", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 403, description = "Admin access required", body = ErrorBody),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all, fields(admin = %admin.0.username))]
pub async fn replace_discount_slab(
    State(state): State<AppState>,
    admin: AdminUser,
    ApiJson(update): ApiJson<DiscountSlabUpdate>,
) -> Result<Json<DiscountSlabResponse>> {
    let slab = update.into_slab(Utc::now());
    slab.validate().map_err(|e| Error::bad_request(e.to_string()))?;

    let stored = state.repos.slabs.replace_slab(&slab).await?;
    info!(levels = stored.levels.len(), status = ?stored.status, "Discount slab replaced");
    Ok(Json(stored.into()))
}

/// Credit tokens to an agent without a payment
#[utoipa::path(
    post,
    path = "/admin/allotments",
    tag = "admin",
    summary = "Allot tokens manually",
    description = "Runs the same allotment as a confirmed purchase. Supplying a receipt makes the call idempotent.",
    request_body = ManualAllotmentRequest,
    responses(
        (status = 200, description = "Tokens allotted", body = AllotmentView),
        (status = 400, description = "Invalid amount or unavailable model", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 403, description = "Admin access required, or the agent is not owned by the user", body = ErrorBody),
        (status = 404, description = "Model not found", body = ErrorBody),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all, fields(admin = %admin.0.username, agent_id = %request.agent_id))]
pub async fn allot_tokens(
    State(state): State<AppState>,
    admin: AdminUser,
    ApiJson(request): ApiJson<ManualAllotmentRequest>,
) -> Result<Json<AllotmentView>> {
    let receipt = request.receipt.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
    let allotment = state
        .engine()
        .allot(&AllotmentRequest {
            username: request.username,
            agent_id: request.agent_id,
            model_name: request.model_name,
            tokens: request.tokens,
            idempotency_key: receipt.clone(),
            metadata: AllotmentMetadata {
                receipt,
                source: Some("admin".to_string()),
            },
        })
        .await?;
    Ok(Json(allotment.into()))
}

#[cfg(test)]
mod tests {
    use crate::config::DummyConfig;
    use crate::db::models::discounts::SlabStatus;
    use crate::payment_providers::{PaymentProvider, dummy::DummyProvider};
    use crate::test_utils::{TestContext, bearer, seed_agent};
    use axum_test::TestServer;
    use rust_decimal::Decimal;
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn server(ctx: &TestContext) -> TestServer {
        let provider: Arc<dyn PaymentProvider> = Arc::new(DummyProvider::from(DummyConfig::default()));
        ctx.server(provider)
    }

    #[tokio::test]
    async fn test_slab_replaced_and_applied() {
        let ctx = TestContext::new();
        seed_agent(&ctx.repos, "agent-1", "alice").await;
        let server = server(&ctx);
        let admin = bearer(&ctx.config, "root", true);

        let response = server
            .put("/admin/discount-slab")
            .add_header("authorization", &admin)
            .json(&json!({
                "status": "active",
                "levels": [
                    { "minOrderValue": 0, "maxOrderValue": 99.99, "discountType": "percentage", "discountValue": 5 },
                    { "minOrderValue": 100, "discountType": "flat", "discountValue": "20.50" }
                ]
            }))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["status"], "active");
        assert_eq!(body["levels"][1]["discountValue"], json!(20.5));

        let slab = ctx.repos.slabs.get_slab().await.unwrap().unwrap();
        assert_eq!(slab.status, SlabStatus::Active);
        assert_eq!(slab.levels[0].max_order_value, Some("99.99".parse::<Decimal>().unwrap()));

        // 15000 gpt-4 tokens cost 150.00, which falls in the flat level
        let quote: Value = server
            .post("/verify_purchase")
            .add_header("authorization", bearer(&ctx.config, "alice", false))
            .json(&json!({ "tokens": 15000, "agentId": "agent-1", "modelName": "gpt-4" }))
            .await
            .json();
        assert_eq!(quote["billing"]["baseDiscount"]["amount"], json!(20.5));
        assert_eq!(quote["billing"]["finalPayable"], json!(129.5));
    }

    #[tokio::test]
    async fn test_invalid_slab_rejected() {
        let ctx = TestContext::new();
        let server = server(&ctx);
        let admin = bearer(&ctx.config, "root", true);

        let response = server
            .put("/admin/discount-slab")
            .add_header("authorization", &admin)
            .json(&json!({
                "status": "active",
                "levels": [{ "minOrderValue": 0, "discountType": "flat", "discountValue": 5 }]
            }))
            .await;
        response.assert_status_bad_request();
        assert!(response.json::<Value>()["error"].as_str().unwrap().starts_with("level 1"));
        assert!(ctx.repos.slabs.get_slab().await.unwrap().is_none());

        server
            .put("/admin/discount-slab")
            .add_header("authorization", &admin)
            .json(&json!({
                "status": "active",
                "levels": [{ "minOrderValue": 0, "discountType": "percentage", "discountValue": 95 }]
            }))
            .await
            .assert_status_bad_request();
    }

    #[tokio::test]
    async fn test_admin_routes_require_admin() {
        let ctx = TestContext::new();
        let server = server(&ctx);
        let body = json!({ "status": "inactive", "levels": [] });

        server.put("/admin/discount-slab").json(&body).await.assert_status_unauthorized();
        server
            .put("/admin/discount-slab")
            .add_header("authorization", bearer(&ctx.config, "alice", false))
            .json(&body)
            .await
            .assert_status_forbidden();
    }

    #[tokio::test]
    async fn test_manual_allotment_is_idempotent_on_receipt() {
        let ctx = TestContext::new();
        seed_agent(&ctx.repos, "agent-1", "alice").await;
        let server = server(&ctx);
        let admin = bearer(&ctx.config, "root", true);
        let request = json!({
            "username": "alice",
            "agentId": "agent-1",
            "modelName": "claude-3",
            "tokens": 700,
            "receipt": "manual_1"
        });

        let first: Value = server
            .post("/admin/allotments")
            .add_header("authorization", &admin)
            .json(&request)
            .await
            .json();
        assert_eq!(first["balance"]["availableTokens"], 700);
        assert_eq!(first["metadata"]["source"], "admin");
        assert_eq!(first["replayed"], false);

        let second: Value = server
            .post("/admin/allotments")
            .add_header("authorization", &admin)
            .json(&request)
            .await
            .json();
        assert_eq!(second["balance"]["availableTokens"], 700);
        assert_eq!(second["replayed"], true);

        let mut wrong_owner = request.clone();
        wrong_owner["username"] = json!("bob");
        wrong_owner["receipt"] = json!("manual_2");
        server
            .post("/admin/allotments")
            .add_header("authorization", &admin)
            .json(&wrong_owner)
            .await
            .assert_status_forbidden();
    }
}
