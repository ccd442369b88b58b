use crate::db::{
    errors::{DbError, Result},
    handlers::repository::{Coupons, Offers},
    models::promotions::{Coupon, Offer},
};
use crate::types::OfferId;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;

const COUPON_COLUMNS: &str =
    "username, coupon_code, used, min_order_value, discount_type, discount_value, max_discount_amount, created_at";

const OFFER_COLUMNS: &str = "offer_id, offer_code, title, discount_type, discount_value, max_discount_amount, offer_type, \
     applicable_to, min_purchase_amount, applicable_products, usage_limit, usage_limit_per_user, global_used_count, \
     start_date, end_date, status";

pub struct PgCoupons {
    pool: PgPool,
}

impl PgCoupons {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Coupons for PgCoupons {
    #[instrument(skip(self), err)]
    async fn get_coupon(&self, username: &str, coupon_code: &str) -> Result<Option<Coupon>> {
        let coupon = sqlx::query_as::<_, Coupon>(&format!(
            "SELECT {COUPON_COLUMNS} FROM user_coupons WHERE username = $1 AND coupon_code = $2"
        ))
        .bind(username)
        .bind(coupon_code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(coupon)
    }

    #[instrument(skip(self, coupon), fields(code = %coupon.coupon_code), err)]
    async fn insert_coupon(&self, coupon: &Coupon) -> Result<Coupon> {
        let saved = sqlx::query_as::<_, Coupon>(&format!(
            "INSERT INTO user_coupons ({COUPON_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {COUPON_COLUMNS}"
        ))
        .bind(&coupon.username)
        .bind(&coupon.coupon_code)
        .bind(coupon.used)
        .bind(coupon.min_order_value)
        .bind(coupon.discount_type)
        .bind(coupon.discount_value)
        .bind(coupon.max_discount_amount)
        .bind(coupon.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(saved)
    }

    #[instrument(skip(self), err)]
    async fn hold_coupon(
        &self,
        username: &str,
        coupon_code: &str,
        receipt: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE user_coupons SET held_by = $3, held_at = $4
             WHERE username = $1 AND coupon_code = $2 AND used = FALSE
               AND (held_by IS NULL OR held_by = $3 OR held_at < $5)",
        )
        .bind(username)
        .bind(coupon_code)
        .bind(receipt)
        .bind(now)
        .bind(stale_before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), err)]
    async fn release_coupon(&self, username: &str, coupon_code: &str, receipt: &str) -> Result<()> {
        sqlx::query(
            "UPDATE user_coupons SET held_by = NULL, held_at = NULL
             WHERE username = $1 AND coupon_code = $2 AND held_by = $3",
        )
        .bind(username)
        .bind(coupon_code)
        .bind(receipt)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn mark_used(&self, username: &str, coupon_code: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE user_coupons SET used = TRUE, held_by = NULL, held_at = NULL
             WHERE username = $1 AND coupon_code = $2 AND used = FALSE",
        )
            .bind(username)
            .bind(coupon_code)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

pub struct PgOffers {
    pool: PgPool,
}

impl PgOffers {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Offers for PgOffers {
    #[instrument(skip(self), err)]
    async fn get_offer_by_code(&self, offer_code: &str) -> Result<Option<Offer>> {
        let offer = sqlx::query_as::<_, Offer>(&format!("SELECT {OFFER_COLUMNS} FROM offers WHERE offer_code = $1"))
            .bind(offer_code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(offer)
    }

    #[instrument(skip(self, offer), fields(offer_id = %offer.offer_id), err)]
    async fn insert_offer(&self, offer: &Offer) -> Result<Offer> {
        let saved = sqlx::query_as::<_, Offer>(&format!(
            "INSERT INTO offers ({OFFER_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
             RETURNING {OFFER_COLUMNS}"
        ))
        .bind(offer.offer_id)
        .bind(&offer.offer_code)
        .bind(&offer.title)
        .bind(offer.discount_type)
        .bind(offer.discount_value)
        .bind(offer.max_discount_amount)
        .bind(&offer.offer_type)
        .bind(&offer.applicable_to)
        .bind(offer.min_purchase_amount)
        .bind(&offer.applicable_products)
        .bind(offer.usage_limit)
        .bind(offer.usage_limit_per_user)
        .bind(offer.global_used_count)
        .bind(offer.start_date)
        .bind(offer.end_date)
        .bind(offer.status)
        .fetch_one(&self.pool)
        .await?;
        Ok(saved)
    }

    #[instrument(skip(self), err)]
    async fn count_user_redemptions(&self, offer_id: OfferId, username: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM offer_redemptions WHERE offer_id = $1 AND username = $2 AND redeemed_at IS NOT NULL",
        )
        .bind(offer_id)
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    #[instrument(skip(self), err)]
    async fn hold_redemption(
        &self,
        offer_id: OfferId,
        username: &str,
        receipt: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // Serialises holds on the same offer
        let limits: Option<(Option<i64>, Option<i64>, i64)> = sqlx::query_as(
            "SELECT usage_limit, usage_limit_per_user, global_used_count FROM offers WHERE offer_id = $1 FOR UPDATE",
        )
        .bind(offer_id)
        .fetch_optional(&mut *tx)
        .await?;
        let (usage_limit, usage_limit_per_user, global_used_count) = limits.ok_or(DbError::NotFound)?;

        let already_held: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM offer_redemptions WHERE offer_id = $1 AND username = $2 AND receipt = $3)",
        )
        .bind(offer_id)
        .bind(username)
        .bind(receipt)
        .fetch_one(&mut *tx)
        .await?;
        if already_held {
            tx.commit().await?;
            return Ok(true);
        }

        let (pending, user_live): (i64, i64) = sqlx::query_as(
            "SELECT
                 COUNT(*) FILTER (WHERE redeemed_at IS NULL),
                 COUNT(*) FILTER (WHERE username = $2)
             FROM offer_redemptions
             WHERE offer_id = $1 AND (redeemed_at IS NOT NULL OR created_at >= $3)",
        )
        .bind(offer_id)
        .bind(username)
        .bind(stale_before)
        .fetch_one(&mut *tx)
        .await?;

        if usage_limit.is_some_and(|limit| global_used_count + pending >= limit)
            || usage_limit_per_user.is_some_and(|limit| user_live >= limit)
        {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("INSERT INTO offer_redemptions (offer_id, username, receipt, created_at) VALUES ($1, $2, $3, $4)")
            .bind(offer_id)
            .bind(username)
            .bind(receipt)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    #[instrument(skip(self), err)]
    async fn release_redemption(&self, offer_id: OfferId, username: &str, receipt: &str) -> Result<()> {
        sqlx::query(
            "DELETE FROM offer_redemptions
             WHERE offer_id = $1 AND username = $2 AND receipt = $3 AND redeemed_at IS NULL",
        )
        .bind(offer_id)
        .bind(username)
        .bind(receipt)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn record_redemption(&self, offer_id: OfferId, username: &str, receipt: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // Completes an existing hold or records a redemption that never had one
        let redeemed = sqlx::query(
            "INSERT INTO offer_redemptions (offer_id, username, receipt, redeemed_at) VALUES ($1, $2, $3, NOW())
             ON CONFLICT (offer_id, username, receipt)
             DO UPDATE SET redeemed_at = NOW() WHERE offer_redemptions.redeemed_at IS NULL",
        )
        .bind(offer_id)
        .bind(username)
        .bind(receipt)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if redeemed {
            sqlx::query("UPDATE offers SET global_used_count = global_used_count + 1 WHERE offer_id = $1")
                .bind(offer_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(redeemed)
    }
}
