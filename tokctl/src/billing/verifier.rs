//! Purchase verification: validate a token purchase and compute its itemised price.

use super::money::{round2, round4};
use super::promotions::{AppliedPromotion, PromotionResolver};
use super::slabs::{self, BaseDiscount};
use super::PurchaseError;
use crate::db::handlers::repository::{AgentAccounts, DiscountSlabs, PricingCatalog, Repositories};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

/// A purchase as requested by a customer
#[derive(Debug, Clone, Default)]
pub struct PurchaseRequest {
    pub username: String,
    pub tokens: i64,
    pub agent_id: String,
    pub model_name: String,
    pub coupon_code: Option<String>,
    pub offer_code: Option<String>,
}

/// Full pricing of a purchase.
///
/// Stored verbatim as an order's billing snapshot, so the field names are the ones the
/// confirmation flow reads back (`agentId`, `modelName`, `tokens`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseQuote {
    pub username: String,
    pub agent_id: String,
    pub model_name: String,
    pub provider: String,
    pub currency: String,
    pub tokens: i64,
    pub per_token_price: Decimal,
    pub base_amount: Decimal,
    pub base_discount: BaseDiscount,
    pub price_after_base_discount: Decimal,
    pub promo: Option<AppliedPromotion>,
    pub total_discount: Decimal,
    pub final_payable: Decimal,
    pub quoted_at: DateTime<Utc>,
}

impl PurchaseQuote {
    /// Per-token price as displayed to customers
    pub fn display_per_token_price(&self) -> Decimal {
        round4(self.per_token_price)
    }

    pub fn promo_discount(&self) -> Decimal {
        self.promo.as_ref().map_or(Decimal::ZERO, |p| p.discount_amount)
    }
}

fn normalise_code(code: Option<&str>) -> Option<&str> {
    code.map(str::trim).filter(|c| !c.is_empty())
}

fn required<'a>(field: &'static str, value: &'a str) -> Result<&'a str, PurchaseError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(PurchaseError::invalid(field, "is required"));
    }
    Ok(value)
}

#[derive(Clone)]
pub struct PurchaseVerifier {
    agents: Arc<dyn AgentAccounts>,
    pricing: Arc<dyn PricingCatalog>,
    slabs: Arc<dyn DiscountSlabs>,
    promotions: PromotionResolver,
    max_tokens_per_order: i64,
}

impl PurchaseVerifier {
    pub fn new(repos: &Repositories, max_tokens_per_order: i64) -> Self {
        Self {
            agents: repos.agents.clone(),
            pricing: repos.pricing.clone(),
            slabs: repos.slabs.clone(),
            promotions: PromotionResolver::new(repos),
            max_tokens_per_order,
        }
    }

    #[instrument(skip(self, request), fields(username = %request.username, agent_id = %request.agent_id, tokens = request.tokens), err)]
    pub async fn verify(&self, request: &PurchaseRequest) -> Result<PurchaseQuote, PurchaseError> {
        self.verify_at(request, Utc::now()).await
    }

    pub async fn verify_at(&self, request: &PurchaseRequest, now: DateTime<Utc>) -> Result<PurchaseQuote, PurchaseError> {
        if request.tokens <= 0 {
            return Err(PurchaseError::invalid("tokens", "must be a positive integer"));
        }
        if request.tokens > self.max_tokens_per_order {
            return Err(PurchaseError::invalid(
                "tokens",
                format!("cannot exceed {} per order", self.max_tokens_per_order),
            ));
        }
        let username = required("username", &request.username)?;
        let agent_id = required("agentId", &request.agent_id)?;
        let model_name = required("modelName", &request.model_name)?;
        let coupon_code = normalise_code(request.coupon_code.as_deref());
        let offer_code = normalise_code(request.offer_code.as_deref());
        if coupon_code.is_some() && offer_code.is_some() {
            return Err(PurchaseError::ConflictingPromotions);
        }

        match self.agents.get_account(agent_id).await? {
            Some(account) if account.username == username => {}
            Some(_) => {
                debug!("Agent belongs to another user");
                return Err(PurchaseError::AgentNotAccessible);
            }
            None => {
                debug!("Agent does not exist");
                return Err(PurchaseError::AgentNotAccessible);
            }
        }

        let model = self
            .pricing
            .get_model(model_name)
            .await?
            .ok_or_else(|| PurchaseError::ModelNotFound(model_name.to_string()))?;
        if !model.is_available_at(now) || model.price_per_token <= Decimal::ZERO {
            return Err(PurchaseError::ModelUnavailable(model.model_name));
        }

        let base_amount = Decimal::from(request.tokens)
            .checked_mul(model.price_per_token)
            .map(round2)
            .ok_or_else(|| PurchaseError::invalid("tokens", "is too large"))?;

        let slab = self.slabs.get_slab().await?;
        let base_discount = slabs::resolve(slab.as_ref(), base_amount);
        let price_after_base_discount = round2(base_amount - base_discount.amount);

        let promo = self
            .promotions
            .resolve(username, &model.model_name, price_after_base_discount, coupon_code, offer_code, now)
            .await?;
        let promo_discount = promo.as_ref().map_or(Decimal::ZERO, |p| p.discount_amount);

        let final_payable = round2((price_after_base_discount - promo_discount).max(Decimal::ZERO));
        let total_discount = round2(base_discount.amount + promo_discount);

        Ok(PurchaseQuote {
            username: username.to_string(),
            agent_id: agent_id.to_string(),
            model_name: model.model_name,
            provider: model.provider,
            currency: model.currency,
            tokens: request.tokens,
            per_token_price: model.price_per_token,
            base_amount,
            base_discount,
            price_after_base_discount,
            promo,
            total_discount,
            final_payable,
            quoted_at: now,
        })
    }
}
