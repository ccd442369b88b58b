use crate::db::{
    errors::Result,
    handlers::repository::DiscountSlabs,
    models::discounts::{BaseDiscountSlab, DiscountSlabLevel, SlabStatus},
};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::instrument;

#[derive(Debug, FromRow)]
struct SlabHeader {
    status: SlabStatus,
    updated_at: DateTime<Utc>,
}

pub struct PgDiscountSlabs {
    pool: PgPool,
}

impl PgDiscountSlabs {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl DiscountSlabs for PgDiscountSlabs {
    #[instrument(skip(self), err)]
    async fn get_slab(&self) -> Result<Option<BaseDiscountSlab>> {
        let mut tx = self.pool.begin().await?;

        let Some(header) = sqlx::query_as::<_, SlabHeader>("SELECT status, updated_at FROM discount_slabs")
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        let levels = sqlx::query_as::<_, DiscountSlabLevel>(
            "SELECT min_order_value, max_order_value, discount_type, discount_value
             FROM discount_slab_levels ORDER BY position",
        )
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Some(BaseDiscountSlab {
            status: header.status,
            levels,
            updated_at: header.updated_at,
        }))
    }

    #[instrument(skip(self, slab), fields(levels = slab.levels.len()), err)]
    async fn replace_slab(&self, slab: &BaseDiscountSlab) -> Result<BaseDiscountSlab> {
        let mut tx = self.pool.begin().await?;

        let header = sqlx::query_as::<_, SlabHeader>(
            "INSERT INTO discount_slabs (id, status, updated_at) VALUES (TRUE, $1, NOW())
             ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, updated_at = EXCLUDED.updated_at
             RETURNING status, updated_at",
        )
        .bind(slab.status)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM discount_slab_levels").execute(&mut *tx).await?;
        for (position, level) in slab.levels.iter().enumerate() {
            sqlx::query(
                "INSERT INTO discount_slab_levels (position, min_order_value, max_order_value, discount_type, discount_value)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(position as i32)
            .bind(level.min_order_value)
            .bind(level.max_order_value)
            .bind(level.discount_type)
            .bind(level.discount_value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(BaseDiscountSlab {
            status: header.status,
            levels: slab.levels.clone(),
            updated_at: header.updated_at,
        })
    }
}
