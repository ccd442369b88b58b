use crate::db::{
    errors::{DbError, Result},
    handlers::repository::OrderLedger,
    models::orders::{Order, OrderCreateDBRequest},
};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

const ORDER_COLUMNS: &str = "id, username, order_id, amount, currency, receipt, billing_snapshot, payment_created_at, \
     fulfillment, status, created_at, updated_at";

pub struct PgOrderLedger {
    pool: PgPool,
}

impl PgOrderLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl OrderLedger for PgOrderLedger {
    #[instrument(skip(self, request), fields(receipt = %request.receipt), err)]
    async fn insert_pending(&self, request: &OrderCreateDBRequest) -> Result<Order> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "INSERT INTO user_orders (id, username, order_id, amount, currency, receipt, billing_snapshot)
             VALUES ($1, $2, '', $3, $4, $5, $6)
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&request.username)
        .bind(request.amount)
        .bind(&request.currency)
        .bind(&request.receipt)
        .bind(&request.billing_snapshot)
        .fetch_one(&self.pool)
        .await?;
        Ok(order)
    }

    #[instrument(skip(self), err)]
    async fn attach_external_id(&self, username: &str, receipt: &str, order_id: &str) -> Result<Order> {
        sqlx::query_as::<_, Order>(&format!(
            "UPDATE user_orders SET order_id = $3, updated_at = NOW()
             WHERE username = $1 AND receipt = $2
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(username)
        .bind(receipt)
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::NotFound)
    }

    #[instrument(skip(self), err)]
    async fn find_by_external_id(&self, username: &str, order_id: &str) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM user_orders WHERE username = $1 AND order_id = $2 AND order_id <> ''"
        ))
        .bind(username)
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(order)
    }

    #[instrument(skip(self), err)]
    async fn find_any_by_external_id(&self, order_id: &str) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM user_orders WHERE order_id = $1 AND order_id <> ''"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(order)
    }

    #[instrument(skip(self), err)]
    async fn find_by_receipt(&self, username: &str, receipt: &str) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM user_orders WHERE username = $1 AND receipt = $2"
        ))
        .bind(username)
        .bind(receipt)
        .fetch_optional(&self.pool)
        .await?;
        Ok(order)
    }

    #[instrument(skip(self), err)]
    async fn mark_fulfilled(&self, username: &str, receipt: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE user_orders SET status = 'paid', fulfillment = TRUE, updated_at = NOW()
             WHERE username = $1 AND receipt = $2 AND fulfillment = FALSE",
        )
        .bind(username)
        .bind(receipt)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), err)]
    async fn list_for_user(&self, username: &str) -> Result<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM user_orders WHERE username = $1 ORDER BY created_at DESC, id"
        ))
        .bind(username)
        .fetch_all(&self.pool)
        .await?;
        Ok(orders)
    }
}
