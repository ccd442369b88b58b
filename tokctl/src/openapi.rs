//! OpenAPI document served at `/api-docs/openapi.json`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::api;

/// Session JWT as a bearer token or as the session cookie
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "BearerAuth".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some(
                            "Session token issued by the platform:\n\n```\nAuthorization: Bearer YOUR_SESSION_TOKEN\n```",
                        ))
                        .build(),
                ),
            );
            components.security_schemes.insert(
                "CookieAuth".to_string(),
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::with_description(
                    "tokctl_session",
                    "The same session token carried in the session cookie",
                ))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "tokctl",
        description = "Token purchases for AI agents: pricing, checkout and allotment"
    ),
    modifiers(&SecurityAddon),
    paths(
        api::handlers::payments::verify_purchase,
        api::handlers::payments::create_order,
        api::handlers::payments::confirm_payment,
        api::handlers::payments::list_orders,
        api::handlers::payments::razorpay_webhook,
        api::handlers::agents::get_agent_tokens,
        api::handlers::agents::set_model_status,
        api::handlers::admin::replace_discount_slab,
        api::handlers::admin::allot_tokens,
    ),
    components(
        schemas(
            api::models::orders::CreateOrderRequest,
            api::models::orders::ConfirmPaymentRequest,
            api::models::orders::BillingView,
            api::models::orders::BaseDiscountView,
            api::models::orders::PromoView,
            api::models::orders::SlabLevelView,
            api::models::orders::VerifyPurchaseResponse,
            api::models::orders::CreateOrderResponse,
            api::models::orders::ConfirmPaymentResponse,
            api::models::orders::OrderView,
            api::models::orders::ListOrdersResponse,
            api::models::agents::AgentTokensResponse,
            api::models::agents::TokenBalanceView,
            api::models::agents::UsingModelView,
            api::models::agents::ModelStatusUpdate,
            api::models::agents::AllotmentView,
            api::models::admin::DiscountSlabUpdate,
            api::models::admin::SlabLevelInput,
            api::models::admin::DiscountSlabResponse,
            api::models::admin::ManualAllotmentRequest,
            api::handlers::payments::WebhookAck,
            crate::errors::ErrorBody,
        )
    ),
    tags(
        (name = "payments", description = "Pricing, checkout and payment confirmation"),
        (name = "agents", description = "Agent token balances"),
        (name = "admin", description = "Discount slab and manual allotments"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_routes_and_security() {
        let doc = ApiDoc::openapi();
        for path in ["/create_order", "/confirm_payment", "/agents/{agent_id}/tokens", "/admin/discount-slab"] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        let schemes = &doc.components.as_ref().unwrap().security_schemes;
        assert!(schemes.contains_key("BearerAuth"));
        assert!(schemes.contains_key("CookieAuth"));
    }
}
