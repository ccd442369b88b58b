//! In-process implementation of every repository trait.
//!
//! Used for local development (`database.type: memory`) and by the test suite. Concurrent
//! writers to the same agent account are serialised by the [`DashMap`] entry lock, which is
//! held for the whole read-modify-write.

use crate::allotment::{AccountCredit, AllotmentError, AllotmentRequest, apply_model_status, credit_account, replayed_credit};
use crate::db::{
    errors::{DbError, Result, Violation},
    handlers::repository::{AgentAccounts, Coupons, DiscountSlabs, Offers, OrderLedger, PricingCatalog},
    models::{
        agents::AgentTokenAccount,
        discounts::BaseDiscountSlab,
        orders::{Order, OrderCreateDBRequest, OrderStatus},
        pricing::PricingModel,
        promotions::{Coupon, Offer},
    },
};
use crate::types::{OfferId, TokenStatus, model_key};
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use uuid::Uuid;

fn unique_violation(table: &str, constraint: &str) -> DbError {
    DbError::UniqueViolation(Violation {
        table: Some(table.to_string()),
        constraint: Some(constraint.to_string()),
        message: format!("duplicate key value violates unique constraint \"{constraint}\""),
    })
}

/// Receipt holding a coupon and when it took the hold
#[derive(Debug, Clone)]
struct CouponHold {
    receipt: String,
    held_at: DateTime<Utc>,
}

/// A held or completed offer redemption
#[derive(Debug, Clone)]
struct Redemption {
    created_at: DateTime<Utc>,
    redeemed: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    /// Keyed by lowercased model name
    pricing: DashMap<String, PricingModel>,
    slab: ArcSwapOption<BaseDiscountSlab>,
    /// Keyed by (username, coupon code)
    coupons: DashMap<(String, String), Coupon>,
    coupon_holds: DashMap<(String, String), CouponHold>,
    offers: DashMap<OfferId, Offer>,
    /// Keyed by (offer, username, receipt)
    redemptions: DashMap<(OfferId, String, String), Redemption>,
    accounts: DashMap<String, AgentTokenAccount>,
    /// (username, idempotency key) of every keyed allotment
    allotment_keys: DashSet<(String, String)>,
    /// Per-user ledgers in insertion order
    orders: DashMap<String, Vec<Order>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose pricing catalog starts out with `models`
    pub fn with_models(models: impl IntoIterator<Item = PricingModel>) -> Self {
        let store = Self::default();
        for model in models {
            store.pricing.insert(model_key(&model.model_name), model);
        }
        store
    }
}

#[async_trait::async_trait]
impl PricingCatalog for MemoryStore {
    async fn get_model(&self, model_name: &str) -> Result<Option<PricingModel>> {
        Ok(self.pricing.get(&model_key(model_name)).map(|m| m.clone()))
    }

    async fn upsert_model(&self, model: &PricingModel) -> Result<PricingModel> {
        self.pricing.insert(model_key(&model.model_name), model.clone());
        Ok(model.clone())
    }

    async fn list_models(&self) -> Result<Vec<PricingModel>> {
        let mut models: Vec<PricingModel> = self.pricing.iter().map(|m| m.value().clone()).collect();
        models.sort_by(|a, b| a.model_name.cmp(&b.model_name));
        Ok(models)
    }
}

#[async_trait::async_trait]
impl DiscountSlabs for MemoryStore {
    async fn get_slab(&self) -> Result<Option<BaseDiscountSlab>> {
        Ok(self.slab.load_full().map(|s| (*s).clone()))
    }

    async fn replace_slab(&self, slab: &BaseDiscountSlab) -> Result<BaseDiscountSlab> {
        let stored = BaseDiscountSlab {
            updated_at: Utc::now(),
            ..slab.clone()
        };
        self.slab.store(Some(Arc::new(stored.clone())));
        Ok(stored)
    }
}

#[async_trait::async_trait]
impl Coupons for MemoryStore {
    async fn get_coupon(&self, username: &str, coupon_code: &str) -> Result<Option<Coupon>> {
        Ok(self
            .coupons
            .get(&(username.to_string(), coupon_code.to_string()))
            .map(|c| c.clone()))
    }

    async fn insert_coupon(&self, coupon: &Coupon) -> Result<Coupon> {
        let key = (coupon.username.clone(), coupon.coupon_code.clone());
        if self.coupons.contains_key(&key) {
            return Err(unique_violation("user_coupons", "user_coupons_pkey"));
        }
        self.coupons.insert(key, coupon.clone());
        Ok(coupon.clone())
    }

    async fn hold_coupon(
        &self,
        username: &str,
        coupon_code: &str,
        receipt: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        let key = (username.to_string(), coupon_code.to_string());
        // The coupon's entry lock serialises holders
        let Some(coupon) = self.coupons.get_mut(&key) else {
            return Ok(false);
        };
        if coupon.used {
            return Ok(false);
        }
        let free = self
            .coupon_holds
            .get(&key)
            .is_none_or(|hold| hold.receipt == receipt || hold.held_at < stale_before);
        if free {
            self.coupon_holds.insert(
                key,
                CouponHold {
                    receipt: receipt.to_string(),
                    held_at: now,
                },
            );
        }
        Ok(free)
    }

    async fn release_coupon(&self, username: &str, coupon_code: &str, receipt: &str) -> Result<()> {
        self.coupon_holds
            .remove_if(&(username.to_string(), coupon_code.to_string()), |_, hold| hold.receipt == receipt);
        Ok(())
    }

    async fn mark_used(&self, username: &str, coupon_code: &str) -> Result<bool> {
        let key = (username.to_string(), coupon_code.to_string());
        match self.coupons.get_mut(&key) {
            Some(mut coupon) if !coupon.used => {
                coupon.used = true;
                self.coupon_holds.remove(&key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait::async_trait]
impl Offers for MemoryStore {
    async fn get_offer_by_code(&self, offer_code: &str) -> Result<Option<Offer>> {
        Ok(self
            .offers
            .iter()
            .find(|o| o.offer_code.as_deref() == Some(offer_code))
            .map(|o| o.value().clone()))
    }

    async fn insert_offer(&self, offer: &Offer) -> Result<Offer> {
        if let Some(code) = offer.offer_code.as_deref()
            && self.get_offer_by_code(code).await?.is_some()
        {
            return Err(unique_violation("offers", "offers_offer_code_key"));
        }
        self.offers.insert(offer.offer_id, offer.clone());
        Ok(offer.clone())
    }

    async fn count_user_redemptions(&self, offer_id: OfferId, username: &str) -> Result<i64> {
        Ok(self
            .redemptions
            .iter()
            .filter(|r| r.key().0 == offer_id && r.key().1 == username && r.redeemed)
            .count() as i64)
    }

    async fn hold_redemption(
        &self,
        offer_id: OfferId,
        username: &str,
        receipt: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        // The offer's entry lock serialises holders
        let offer = self.offers.get_mut(&offer_id).ok_or(DbError::NotFound)?;
        let key = (offer_id, username.to_string(), receipt.to_string());
        if self.redemptions.contains_key(&key) {
            return Ok(true);
        }

        let (mut pending, mut user_live) = (0i64, 0i64);
        for row in self.redemptions.iter().filter(|r| r.key().0 == offer_id) {
            let live = row.redeemed || row.created_at >= stale_before;
            if live && !row.redeemed {
                pending += 1;
            }
            if live && row.key().1 == username {
                user_live += 1;
            }
        }
        if offer
            .usage_limit
            .is_some_and(|limit| offer.global_used_count + pending >= limit)
            || offer.usage_limit_per_user.is_some_and(|limit| user_live >= limit)
        {
            return Ok(false);
        }

        self.redemptions.insert(
            key,
            Redemption {
                created_at: now,
                redeemed: false,
            },
        );
        Ok(true)
    }

    async fn release_redemption(&self, offer_id: OfferId, username: &str, receipt: &str) -> Result<()> {
        self.redemptions
            .remove_if(&(offer_id, username.to_string(), receipt.to_string()), |_, row| !row.redeemed);
        Ok(())
    }

    async fn record_redemption(&self, offer_id: OfferId, username: &str, receipt: &str) -> Result<bool> {
        let mut offer = self.offers.get_mut(&offer_id).ok_or(DbError::NotFound)?;
        let mut row = self
            .redemptions
            .entry((offer_id, username.to_string(), receipt.to_string()))
            .or_insert_with(|| Redemption {
                created_at: Utc::now(),
                redeemed: false,
            });
        if row.redeemed {
            return Ok(false);
        }
        row.redeemed = true;
        offer.global_used_count += 1;
        Ok(true)
    }
}

#[async_trait::async_trait]
impl AgentAccounts for MemoryStore {
    async fn get_account(&self, agent_id: &str) -> Result<Option<AgentTokenAccount>> {
        Ok(self.accounts.get(agent_id).map(|a| a.clone()))
    }

    async fn create_account(&self, agent_id: &str, username: &str) -> Result<AgentTokenAccount> {
        if self.accounts.contains_key(agent_id) {
            return Err(unique_violation("agent_token_accounts", "agent_token_accounts_pkey"));
        }
        let account = AgentTokenAccount::new(agent_id, username, Utc::now());
        self.accounts.insert(agent_id.to_string(), account.clone());
        Ok(account)
    }

    async fn credit_tokens(
        &self,
        request: &AllotmentRequest,
        now: DateTime<Utc>,
    ) -> std::result::Result<AccountCredit, AllotmentError> {
        let mut account = self
            .accounts
            .get_mut(&request.agent_id)
            .ok_or(AllotmentError::AgentNotFound)?;
        if account.username != request.username {
            return Err(AllotmentError::NotAgentOwner);
        }

        let key = request
            .idempotency_key
            .as_ref()
            .map(|k| (request.username.clone(), k.clone()));
        if let Some(key) = &key
            && self.allotment_keys.contains(key)
        {
            return replayed_credit(&account, &request.model_name);
        }

        let credit = credit_account(&mut account, &request.username, &request.model_name, request.tokens, now)?;
        if let Some(key) = key {
            self.allotment_keys.insert(key);
        }
        Ok(credit)
    }

    async fn set_model_status(
        &self,
        username: &str,
        agent_id: &str,
        model_name: &str,
        status: TokenStatus,
        now: DateTime<Utc>,
    ) -> std::result::Result<AgentTokenAccount, AllotmentError> {
        let mut account = self.accounts.get_mut(agent_id).ok_or(AllotmentError::AgentNotFound)?;
        apply_model_status(&mut account, username, model_name, status, now)?;
        Ok(account.clone())
    }
}

#[async_trait::async_trait]
impl OrderLedger for MemoryStore {
    async fn insert_pending(&self, request: &OrderCreateDBRequest) -> Result<Order> {
        let mut ledger = self.orders.entry(request.username.clone()).or_default();
        if ledger.iter().any(|o| o.receipt == request.receipt) {
            return Err(unique_violation("user_orders", "user_orders_username_receipt_key"));
        }
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            username: request.username.clone(),
            order_id: String::new(),
            amount: request.amount,
            currency: request.currency.clone(),
            receipt: request.receipt.clone(),
            billing_snapshot: request.billing_snapshot.clone(),
            payment_created_at: now,
            fulfillment: false,
            status: OrderStatus::Created,
            created_at: now,
            updated_at: now,
        };
        ledger.push(order.clone());
        Ok(order)
    }

    async fn attach_external_id(&self, username: &str, receipt: &str, order_id: &str) -> Result<Order> {
        let mut ledger = self.orders.get_mut(username).ok_or(DbError::NotFound)?;
        let order = ledger
            .iter_mut()
            .find(|o| o.receipt == receipt)
            .ok_or(DbError::NotFound)?;
        order.order_id = order_id.to_string();
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn find_by_external_id(&self, username: &str, order_id: &str) -> Result<Option<Order>> {
        if order_id.is_empty() {
            return Ok(None);
        }
        Ok(self
            .orders
            .get(username)
            .and_then(|ledger| ledger.iter().find(|o| o.order_id == order_id).cloned()))
    }

    async fn find_any_by_external_id(&self, order_id: &str) -> Result<Option<Order>> {
        if order_id.is_empty() {
            return Ok(None);
        }
        Ok(self
            .orders
            .iter()
            .find_map(|ledger| ledger.iter().find(|o| o.order_id == order_id).cloned()))
    }

    async fn find_by_receipt(&self, username: &str, receipt: &str) -> Result<Option<Order>> {
        Ok(self
            .orders
            .get(username)
            .and_then(|ledger| ledger.iter().find(|o| o.receipt == receipt).cloned()))
    }

    async fn mark_fulfilled(&self, username: &str, receipt: &str) -> Result<bool> {
        let Some(mut ledger) = self.orders.get_mut(username) else {
            return Ok(false);
        };
        match ledger.iter_mut().find(|o| o.receipt == receipt) {
            Some(order) if !order.fulfillment => {
                order.fulfillment = true;
                order.status = OrderStatus::Paid;
                order.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_for_user(&self, username: &str) -> Result<Vec<Order>> {
        Ok(self
            .orders
            .get(username)
            .map(|ledger| ledger.iter().rev().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allotment::AllotmentMetadata;
    use serde_json::json;

    fn pending(username: &str, receipt: &str) -> OrderCreateDBRequest {
        OrderCreateDBRequest {
            username: username.to_string(),
            receipt: receipt.to_string(),
            amount: "9.00".parse().unwrap(),
            currency: "INR".to_string(),
            billing_snapshot: json!({"agentId": "agent-1", "modelName": "gpt-4", "tokens": 1000}),
        }
    }

    #[tokio::test]
    async fn test_receipt_unique_per_user() {
        let store = MemoryStore::new();
        store.insert_pending(&pending("alice", "rcpt_1")).await.unwrap();

        let err = store.insert_pending(&pending("alice", "rcpt_1")).await.unwrap_err();
        assert!(err.is_unique_violation_on("user_orders_username_receipt_key"));

        // Same receipt for another user is fine
        store.insert_pending(&pending("bob", "rcpt_1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_order_lifecycle() {
        let store = MemoryStore::new();
        let order = store.insert_pending(&pending("alice", "rcpt_1")).await.unwrap();
        assert_eq!(order.order_id, "");
        assert!(!order.fulfillment);
        assert_eq!(order.status, OrderStatus::Created);

        // An unassigned external id never matches
        assert!(store.find_by_external_id("alice", "").await.unwrap().is_none());

        store.attach_external_id("alice", "rcpt_1", "order_ABC").await.unwrap();
        let found = store.find_by_external_id("alice", "order_ABC").await.unwrap().unwrap();
        assert_eq!(found.receipt, "rcpt_1");
        assert!(store.find_by_external_id("bob", "order_ABC").await.unwrap().is_none());
        assert!(store.find_any_by_external_id("order_ABC").await.unwrap().is_some());

        assert!(store.mark_fulfilled("alice", "rcpt_1").await.unwrap());
        assert!(!store.mark_fulfilled("alice", "rcpt_1").await.unwrap());
        let paid = store.find_by_receipt("alice", "rcpt_1").await.unwrap().unwrap();
        assert!(paid.fulfillment);
        assert_eq!(paid.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_list_orders_newest_first() {
        let store = MemoryStore::new();
        store.insert_pending(&pending("alice", "rcpt_1")).await.unwrap();
        store.insert_pending(&pending("alice", "rcpt_2")).await.unwrap();

        let receipts: Vec<_> = store
            .list_for_user("alice")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.receipt)
            .collect();
        assert_eq!(receipts, vec!["rcpt_2", "rcpt_1"]);
        assert!(store.list_for_user("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_credits_are_serialised() {
        let store = Arc::new(MemoryStore::new());
        store.create_account("agent-1", "alice").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let request = AllotmentRequest {
                    username: "alice".to_string(),
                    agent_id: "agent-1".to_string(),
                    model_name: "gpt-4".to_string(),
                    tokens: 50,
                    idempotency_key: None,
                    metadata: AllotmentMetadata::default(),
                };
                store.credit_tokens(&request, Utc::now()).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let account = store.get_account("agent-1").await.unwrap().unwrap();
        assert_eq!(account.token_balances.len(), 1);
        assert_eq!(account.token_balances[0].available_tokens, 1000);
    }

    #[tokio::test]
    async fn test_coupon_marked_used_once() {
        let store = MemoryStore::new();
        store
            .insert_coupon(&Coupon {
                username: "alice".to_string(),
                coupon_code: "WELCOME".to_string(),
                used: false,
                min_order_value: "100".parse().unwrap(),
                discount_type: crate::types::DiscountType::Percentage,
                discount_value: "10".parse().unwrap(),
                max_discount_amount: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        assert!(store.mark_used("alice", "WELCOME").await.unwrap());
        assert!(!store.mark_used("alice", "WELCOME").await.unwrap());
        assert!(store.get_coupon("alice", "WELCOME").await.unwrap().unwrap().used);
        assert!(!store.mark_used("bob", "WELCOME").await.unwrap());
    }

    #[tokio::test]
    async fn test_coupon_hold_lifecycle() {
        let store = MemoryStore::new();
        store
            .insert_coupon(&Coupon {
                username: "alice".to_string(),
                coupon_code: "ONCE".to_string(),
                used: false,
                min_order_value: "0".parse().unwrap(),
                discount_type: crate::types::DiscountType::Flat,
                discount_value: "0".parse().unwrap(),
                max_discount_amount: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let now = Utc::now();
        let fresh = now - chrono::Duration::minutes(30);

        assert!(store.hold_coupon("alice", "ONCE", "rcpt_1", now, fresh).await.unwrap());
        assert!(store.hold_coupon("alice", "ONCE", "rcpt_1", now, fresh).await.unwrap());
        assert!(!store.hold_coupon("alice", "ONCE", "rcpt_2", now, fresh).await.unwrap());

        // Releasing someone else's hold does nothing
        store.release_coupon("alice", "ONCE", "rcpt_2").await.unwrap();
        assert!(!store.hold_coupon("alice", "ONCE", "rcpt_2", now, fresh).await.unwrap());

        // A hold older than the cut-off can be taken over
        let later = now + chrono::Duration::hours(1);
        assert!(store.hold_coupon("alice", "ONCE", "rcpt_2", later, now + chrono::Duration::minutes(1)).await.unwrap());

        store.release_coupon("alice", "ONCE", "rcpt_2").await.unwrap();
        assert!(store.mark_used("alice", "ONCE").await.unwrap());
        assert!(!store.hold_coupon("alice", "ONCE", "rcpt_3", later, fresh).await.unwrap());
        assert!(!store.hold_coupon("bob", "ONCE", "rcpt_3", later, fresh).await.unwrap());
    }
}
