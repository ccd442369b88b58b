//! Purchase pricing: base-discount slab, coupons and offers, and the verifier that combines
//! them into an itemised quote.
//!
//! Everything here is side-effect free. Promotions are held by a pending order and only
//! consumed once it has been fulfilled (see [`crate::checkout`]).

pub mod money;
pub mod promotions;
pub mod receipts;
pub mod slabs;
pub mod verifier;

pub use promotions::{AppliedPromotion, PromoKind, PromotionResolver};
pub use slabs::BaseDiscount;
pub use verifier::{PurchaseQuote, PurchaseRequest, PurchaseVerifier};

use crate::db::errors::DbError;
use rust_decimal::Decimal;

/// Why a purchase could not be priced
#[derive(Debug, thiserror::Error)]
pub enum PurchaseError {
    #[error("{field} {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("A coupon and an offer cannot be applied together")]
    ConflictingPromotions,

    /// Covers both a missing agent and one owned by someone else
    #[error("Agent not found or access denied")]
    AgentNotAccessible,

    #[error("AI model {0} not found")]
    ModelNotFound(String),

    #[error("AI model {0} is no longer available for purchase")]
    ModelUnavailable(String),

    #[error("Coupon not found")]
    CouponNotFound,

    #[error("Coupon has already been used")]
    CouponAlreadyUsed,

    #[error("Coupon is already applied to another pending order")]
    CouponInUse,

    #[error("A minimum order value of {minimum} is required to use this coupon")]
    CouponMinimumNotMet { minimum: Decimal },

    #[error("Coupon discount exceeds the allowed limit")]
    CouponOverLimit,

    #[error("Offer not found")]
    OfferNotFound,

    #[error("Offer is not active")]
    OfferInactive,

    #[error("A minimum purchase amount of {minimum} is required for this offer")]
    OfferMinimumNotMet { minimum: Decimal },

    #[error("Offer does not apply to model {0}")]
    OfferNotApplicable(String),

    #[error("Offer usage limit reached")]
    OfferUsageExhausted,

    #[error(transparent)]
    Database(#[from] DbError),
}

impl PurchaseError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        PurchaseError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}
