use crate::db::{
    errors::Result,
    handlers::repository::PricingCatalog,
    models::pricing::PricingModel,
};
use sqlx::PgPool;
use tracing::instrument;

const MODEL_COLUMNS: &str = "model_name, provider, price_per_token, currency, available_till";

pub struct PgPricingCatalog {
    pool: PgPool,
}

impl PgPricingCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PricingCatalog for PgPricingCatalog {
    #[instrument(skip(self), err)]
    async fn get_model(&self, model_name: &str) -> Result<Option<PricingModel>> {
        let model = sqlx::query_as::<_, PricingModel>(&format!(
            "SELECT {MODEL_COLUMNS} FROM pricing_models WHERE LOWER(model_name) = LOWER($1)"
        ))
        .bind(model_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(model)
    }

    #[instrument(skip(self, model), fields(model = %model.model_name), err)]
    async fn upsert_model(&self, model: &PricingModel) -> Result<PricingModel> {
        let saved = sqlx::query_as::<_, PricingModel>(&format!(
            "INSERT INTO pricing_models ({MODEL_COLUMNS}) VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (model_name) DO UPDATE SET
                provider = EXCLUDED.provider,
                price_per_token = EXCLUDED.price_per_token,
                currency = EXCLUDED.currency,
                available_till = EXCLUDED.available_till,
                updated_at = NOW()
             RETURNING {MODEL_COLUMNS}"
        ))
        .bind(&model.model_name)
        .bind(&model.provider)
        .bind(model.price_per_token)
        .bind(&model.currency)
        .bind(model.available_till)
        .fetch_one(&self.pool)
        .await?;
        Ok(saved)
    }

    #[instrument(skip(self), err)]
    async fn list_models(&self) -> Result<Vec<PricingModel>> {
        let models = sqlx::query_as::<_, PricingModel>(&format!("SELECT {MODEL_COLUMNS} FROM pricing_models ORDER BY model_name"))
            .fetch_all(&self.pool)
            .await?;
        Ok(models)
    }
}
