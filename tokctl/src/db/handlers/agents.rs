use crate::allotment::{AccountCredit, AllotmentError, AllotmentRequest, apply_model_status, credit_account, replayed_credit};
use crate::db::{
    errors::Result,
    handlers::repository::AgentAccounts,
    models::agents::{AgentTokenAccount, TokenBalance, UsingModel},
};
use crate::types::{TokenStatus, model_key};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool, types::Json};
use tracing::{debug, instrument};

// Database entity model for the account row; balances live in their own table
#[derive(Debug, FromRow)]
struct AccountRow {
    agent_id: String,
    username: String,
    using_model: Option<Json<UsingModel>>,
    last_modified: DateTime<Utc>,
}

impl AccountRow {
    fn into_account(self, token_balances: Vec<TokenBalance>) -> AgentTokenAccount {
        AgentTokenAccount {
            agent_id: self.agent_id,
            username: self.username,
            token_balances,
            using_model: self.using_model.map(|Json(u)| u),
            last_modified: self.last_modified,
        }
    }
}

pub struct PgAgentAccounts {
    pool: PgPool,
}

impl PgAgentAccounts {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load(conn: &mut PgConnection, agent_id: &str, for_update: bool) -> Result<Option<AgentTokenAccount>> {
        let lock = if for_update { " FOR UPDATE" } else { "" };
        let Some(row) = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT agent_id, username, using_model, last_modified FROM agent_token_accounts WHERE agent_id = $1{lock}"
        ))
        .bind(agent_id)
        .fetch_optional(&mut *conn)
        .await?
        else {
            return Ok(None);
        };

        let balances = sqlx::query_as::<_, TokenBalance>(
            "SELECT model_name, available_tokens, status, created_at, updated_at
             FROM agent_token_balances WHERE agent_id = $1 ORDER BY id",
        )
        .bind(agent_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(Some(row.into_account(balances)))
    }

    /// Write every balance and the account header back
    async fn store(conn: &mut PgConnection, account: &AgentTokenAccount) -> Result<()> {
        for balance in &account.token_balances {
            sqlx::query(
                "INSERT INTO agent_token_balances
                    (agent_id, model_name, model_key, available_tokens, status, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (agent_id, model_key) DO UPDATE SET
                    available_tokens = EXCLUDED.available_tokens,
                    status = EXCLUDED.status,
                    updated_at = EXCLUDED.updated_at",
            )
            .bind(&account.agent_id)
            .bind(&balance.model_name)
            .bind(model_key(&balance.model_name))
            .bind(balance.available_tokens)
            .bind(balance.status)
            .bind(balance.created_at)
            .bind(balance.updated_at)
            .execute(&mut *conn)
            .await?;
        }

        sqlx::query("UPDATE agent_token_accounts SET using_model = $2, last_modified = $3 WHERE agent_id = $1")
            .bind(&account.agent_id)
            .bind(account.using_model.clone().map(Json))
            .bind(account.last_modified)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl AgentAccounts for PgAgentAccounts {
    #[instrument(skip(self), err)]
    async fn get_account(&self, agent_id: &str) -> Result<Option<AgentTokenAccount>> {
        let mut conn = self.pool.acquire().await?;
        Self::load(&mut conn, agent_id, false).await
    }

    #[instrument(skip(self), err)]
    async fn create_account(&self, agent_id: &str, username: &str) -> Result<AgentTokenAccount> {
        let row = sqlx::query_as::<_, AccountRow>(
            "INSERT INTO agent_token_accounts (agent_id, username) VALUES ($1, $2)
             RETURNING agent_id, username, using_model, last_modified",
        )
        .bind(agent_id)
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into_account(Vec::new()))
    }

    #[instrument(skip(self, request), fields(agent_id = %request.agent_id, model = %request.model_name), err)]
    async fn credit_tokens(
        &self,
        request: &AllotmentRequest,
        now: DateTime<Utc>,
    ) -> std::result::Result<AccountCredit, AllotmentError> {
        let mut tx = self.pool.begin().await?;

        // Row lock serialises concurrent allotments to the same agent
        let mut account = Self::load(&mut tx, &request.agent_id, true)
            .await?
            .ok_or(AllotmentError::AgentNotFound)?;
        if account.username != request.username {
            return Err(AllotmentError::NotAgentOwner);
        }

        if let Some(key) = &request.idempotency_key {
            let seen: Option<i64> =
                sqlx::query_scalar("SELECT id FROM token_allotments WHERE username = $1 AND idempotency_key = $2")
                    .bind(&request.username)
                    .bind(key)
                    .fetch_optional(&mut *tx)
                    .await?;
            if seen.is_some() {
                debug!(key = %key, "Idempotency key already recorded");
                return replayed_credit(&account, &request.model_name);
            }
        }

        let credit = credit_account(&mut account, &request.username, &request.model_name, request.tokens, now)?;
        Self::store(&mut tx, &account).await?;

        sqlx::query(
            "INSERT INTO token_allotments (username, agent_id, model_name, tokens, idempotency_key, source, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&request.username)
        .bind(&request.agent_id)
        .bind(&credit.balance.model_name)
        .bind(request.tokens)
        .bind(&request.idempotency_key)
        .bind(&request.metadata.source)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(credit)
    }

    #[instrument(skip(self), err)]
    async fn set_model_status(
        &self,
        username: &str,
        agent_id: &str,
        model_name: &str,
        status: TokenStatus,
        now: DateTime<Utc>,
    ) -> std::result::Result<AgentTokenAccount, AllotmentError> {
        let mut tx = self.pool.begin().await?;
        let mut account = Self::load(&mut tx, agent_id, true)
            .await?
            .ok_or(AllotmentError::AgentNotFound)?;

        apply_model_status(&mut account, username, model_name, status, now)?;
        Self::store(&mut tx, &account).await?;

        tx.commit().await?;
        Ok(account)
    }
}
