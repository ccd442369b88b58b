//! Repository traits for the data the purchase flow reads and writes.
//!
//! Every store the service talks to sits behind one of these traits. The Postgres
//! implementations live next to this module; [`crate::db::memory::MemoryStore`] implements
//! all of them in process. [`Repositories`] bundles one implementation of each and is built
//! once at start-up.

use crate::allotment::{AccountCredit, AllotmentError, AllotmentRequest};
use crate::db::errors::Result;
use crate::db::models::{
    agents::AgentTokenAccount,
    discounts::BaseDiscountSlab,
    orders::{Order, OrderCreateDBRequest},
    pricing::PricingModel,
    promotions::{Coupon, Offer},
};
use crate::types::{OfferId, TokenStatus};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;

/// Per-token prices and availability windows
#[async_trait::async_trait]
pub trait PricingCatalog: Send + Sync {
    /// Case-insensitive lookup by model name
    async fn get_model(&self, model_name: &str) -> Result<Option<PricingModel>>;

    async fn upsert_model(&self, model: &PricingModel) -> Result<PricingModel>;

    async fn list_models(&self) -> Result<Vec<PricingModel>>;
}

/// The platform-wide base-discount slab
#[async_trait::async_trait]
pub trait DiscountSlabs: Send + Sync {
    async fn get_slab(&self) -> Result<Option<BaseDiscountSlab>>;

    /// Replace status and levels in one step. Callers validate first.
    async fn replace_slab(&self, slab: &BaseDiscountSlab) -> Result<BaseDiscountSlab>;
}

/// Per-user single-use coupons
#[async_trait::async_trait]
pub trait Coupons: Send + Sync {
    async fn get_coupon(&self, username: &str, coupon_code: &str) -> Result<Option<Coupon>>;

    async fn insert_coupon(&self, coupon: &Coupon) -> Result<Coupon>;

    /// Reserve an unused coupon for the pending order `receipt`.
    ///
    /// Succeeds when nobody holds it, when `receipt` already does, or when the current hold
    /// was taken before `stale_before`. Returns false otherwise.
    async fn hold_coupon(
        &self,
        username: &str,
        coupon_code: &str,
        receipt: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool>;

    /// Drop the hold `receipt` has on the coupon, if any
    async fn release_coupon(&self, username: &str, coupon_code: &str, receipt: &str) -> Result<()>;

    /// Flip `used` to true. Returns false when the coupon was already used or is missing.
    async fn mark_used(&self, username: &str, coupon_code: &str) -> Result<bool>;
}

/// Global promotional offers and their redemptions
#[async_trait::async_trait]
pub trait Offers: Send + Sync {
    async fn get_offer_by_code(&self, offer_code: &str) -> Result<Option<Offer>>;

    async fn insert_offer(&self, offer: &Offer) -> Result<Offer>;

    /// Completed redemptions only
    async fn count_user_redemptions(&self, offer_id: OfferId, username: &str) -> Result<i64>;

    /// Claim one use of the offer for the pending order `receipt`.
    ///
    /// Completed redemptions and holds taken at or after `stale_before` both count against
    /// `usage_limit` and `usage_limit_per_user`. Returns false when either is exhausted.
    /// Claiming again for the same receipt succeeds.
    async fn hold_redemption(
        &self,
        offer_id: OfferId,
        username: &str,
        receipt: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool>;

    /// Drop an uncompleted hold
    async fn release_redemption(&self, offer_id: OfferId, username: &str, receipt: &str) -> Result<()>;

    /// Complete the redemption for `receipt` and bump `global_used_count`.
    ///
    /// Returns false without counting when the receipt was already redeemed.
    async fn record_redemption(&self, offer_id: OfferId, username: &str, receipt: &str) -> Result<bool>;
}

/// Agent token accounts
#[async_trait::async_trait]
pub trait AgentAccounts: Send + Sync {
    async fn get_account(&self, agent_id: &str) -> Result<Option<AgentTokenAccount>>;

    /// Create an empty account. Agent provisioning normally happens elsewhere on the platform.
    async fn create_account(&self, agent_id: &str, username: &str) -> Result<AgentTokenAccount>;

    /// Atomically credit tokens, honouring the request's idempotency key
    async fn credit_tokens(
        &self,
        request: &AllotmentRequest,
        now: DateTime<Utc>,
    ) -> std::result::Result<AccountCredit, AllotmentError>;

    async fn set_model_status(
        &self,
        username: &str,
        agent_id: &str,
        model_name: &str,
        status: TokenStatus,
        now: DateTime<Utc>,
    ) -> std::result::Result<AgentTokenAccount, AllotmentError>;
}

/// Per-user order ledger. Rows are appended and never deleted.
#[async_trait::async_trait]
pub trait OrderLedger: Send + Sync {
    /// Append a pending order with an empty external id
    async fn insert_pending(&self, request: &OrderCreateDBRequest) -> Result<Order>;

    /// Set the gateway order id on the row matching `receipt`
    async fn attach_external_id(&self, username: &str, receipt: &str, order_id: &str) -> Result<Order>;

    async fn find_by_external_id(&self, username: &str, order_id: &str) -> Result<Option<Order>>;

    /// Lookup across all users, for gateway callbacks that carry no session
    async fn find_any_by_external_id(&self, order_id: &str) -> Result<Option<Order>>;

    async fn find_by_receipt(&self, username: &str, receipt: &str) -> Result<Option<Order>>;

    /// Mark the order paid and fulfilled. Returns false when it already was.
    async fn mark_fulfilled(&self, username: &str, receipt: &str) -> Result<bool>;

    /// Newest first
    async fn list_for_user(&self, username: &str) -> Result<Vec<Order>>;
}

/// One implementation of every repository, shared through the application state
#[derive(Clone)]
pub struct Repositories {
    pub pricing: Arc<dyn PricingCatalog>,
    pub slabs: Arc<dyn DiscountSlabs>,
    pub coupons: Arc<dyn Coupons>,
    pub offers: Arc<dyn Offers>,
    pub agents: Arc<dyn AgentAccounts>,
    pub orders: Arc<dyn OrderLedger>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        use super::{PgAgentAccounts, PgCoupons, PgDiscountSlabs, PgOffers, PgOrderLedger, PgPricingCatalog};

        Self {
            pricing: Arc::new(PgPricingCatalog::new(pool.clone())),
            slabs: Arc::new(PgDiscountSlabs::new(pool.clone())),
            coupons: Arc::new(PgCoupons::new(pool.clone())),
            offers: Arc::new(PgOffers::new(pool.clone())),
            agents: Arc::new(PgAgentAccounts::new(pool.clone())),
            orders: Arc::new(PgOrderLedger::new(pool)),
        }
    }

    pub fn in_memory(store: Arc<crate::db::memory::MemoryStore>) -> Self {
        Self {
            pricing: store.clone(),
            slabs: store.clone(),
            coupons: store.clone(),
            offers: store.clone(),
            agents: store.clone(),
            orders: store,
        }
    }
}
