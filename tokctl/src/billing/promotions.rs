//! Coupon and offer resolution.
//!
//! At most one promotion applies to a purchase. Discounts are computed on the price after
//! the base discount and are capped so that a promotion never takes more than 90% of that
//! price.

use super::PurchaseError;
use super::money::{percentage_of, round2};
use crate::db::handlers::repository::{Coupons, Offers, Repositories};
use crate::db::models::promotions::{Coupon, Offer};
use crate::types::{DiscountType, OfferId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use utoipa::ToSchema;

/// Highest coupon percentage accepted
pub const MAX_COUPON_PERCENTAGE: Decimal = Decimal::from_parts(50, 0, 0, false, 0);

/// Highest share of a coupon's `min_order_value` a flat coupon may take
pub const MAX_COUPON_FLAT_SHARE: Decimal = Decimal::from_parts(50, 0, 0, false, 2);

/// Share of the post-base-discount price a promotion may take at most
pub const PROMO_CAP_SHARE: Decimal = Decimal::from_parts(90, 0, 0, false, 2);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PromoKind {
    Coupon,
    Offer,
}

/// The promotion a quote was priced with
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppliedPromotion {
    #[serde(rename = "type")]
    pub kind: PromoKind,
    pub code: String,
    pub discount_amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer_id: Option<OfferId>,
}

fn raw_discount(discount_type: DiscountType, value: Decimal, price: Decimal) -> Decimal {
    match discount_type {
        DiscountType::Percentage => round2(percentage_of(price, value)),
        DiscountType::Flat => round2(value),
    }
}

/// Clamp to the optional maximum, the price itself and the promotion ceiling
fn clamp_promo(discount: Decimal, max_discount: Option<Decimal>, price: Decimal) -> Decimal {
    let mut discount = discount.max(Decimal::ZERO);
    if let Some(max) = max_discount {
        discount = discount.min(max);
    }
    discount.min(price).min(round2(price * PROMO_CAP_SHARE))
}

/// Discount granted by `coupon` on `price`, or why it cannot be used
pub fn coupon_discount(coupon: &Coupon, price: Decimal) -> Result<Decimal, PurchaseError> {
    if coupon.used {
        return Err(PurchaseError::CouponAlreadyUsed);
    }
    if price < coupon.min_order_value {
        return Err(PurchaseError::CouponMinimumNotMet {
            minimum: coupon.min_order_value,
        });
    }
    let within_limit = match coupon.discount_type {
        DiscountType::Percentage => coupon.discount_value <= MAX_COUPON_PERCENTAGE,
        DiscountType::Flat => coupon.discount_value <= coupon.min_order_value * MAX_COUPON_FLAT_SHARE,
    };
    if !within_limit {
        return Err(PurchaseError::CouponOverLimit);
    }

    let discount = raw_discount(coupon.discount_type, coupon.discount_value, price);
    Ok(clamp_promo(discount, coupon.max_discount_amount, price))
}

/// Discount granted by `offer` on `price` for `model_name`, or why it cannot be used
pub fn offer_discount(
    offer: &Offer,
    model_name: &str,
    price: Decimal,
    user_redemptions: i64,
    now: DateTime<Utc>,
) -> Result<Decimal, PurchaseError> {
    if !offer.is_live_at(now) {
        return Err(PurchaseError::OfferInactive);
    }
    if let Some(minimum) = offer.min_purchase_amount
        && price < minimum
    {
        return Err(PurchaseError::OfferMinimumNotMet { minimum });
    }
    if !offer.applies_to_model(model_name) {
        return Err(PurchaseError::OfferNotApplicable(model_name.to_string()));
    }
    if offer.global_limit_reached() || offer.usage_limit_per_user.is_some_and(|limit| user_redemptions >= limit) {
        return Err(PurchaseError::OfferUsageExhausted);
    }

    let discount = raw_discount(offer.discount_type, offer.discount_value, price);
    Ok(clamp_promo(discount, offer.max_discount_amount, price))
}

/// Looks up and prices the coupon or offer named on a purchase
#[derive(Clone)]
pub struct PromotionResolver {
    coupons: Arc<dyn Coupons>,
    offers: Arc<dyn Offers>,
}

impl PromotionResolver {
    pub fn new(repos: &Repositories) -> Self {
        Self {
            coupons: repos.coupons.clone(),
            offers: repos.offers.clone(),
        }
    }

    /// Codes must already be trimmed; `None` means absent.
    pub async fn resolve(
        &self,
        username: &str,
        model_name: &str,
        price: Decimal,
        coupon_code: Option<&str>,
        offer_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<AppliedPromotion>, PurchaseError> {
        match (coupon_code, offer_code) {
            (Some(_), Some(_)) => Err(PurchaseError::ConflictingPromotions),
            (Some(code), None) => {
                let coupon = self
                    .coupons
                    .get_coupon(username, code)
                    .await?
                    .ok_or(PurchaseError::CouponNotFound)?;
                let discount_amount = coupon_discount(&coupon, price)?;
                debug!(code, %discount_amount, "Coupon applied");
                Ok(Some(AppliedPromotion {
                    kind: PromoKind::Coupon,
                    code: coupon.coupon_code,
                    discount_amount,
                    offer_id: None,
                }))
            }
            (None, Some(code)) => {
                let offer = self
                    .offers
                    .get_offer_by_code(code)
                    .await?
                    .ok_or(PurchaseError::OfferNotFound)?;
                let redemptions = match offer.usage_limit_per_user {
                    Some(_) => self.offers.count_user_redemptions(offer.offer_id, username).await?,
                    None => 0,
                };
                let discount_amount = offer_discount(&offer, model_name, price, redemptions, now)?;
                debug!(code, %discount_amount, "Offer applied");
                Ok(Some(AppliedPromotion {
                    kind: PromoKind::Offer,
                    code: code.to_string(),
                    discount_amount,
                    offer_id: Some(offer.offer_id),
                }))
            }
            (None, None) => Ok(None),
        }
    }
}
