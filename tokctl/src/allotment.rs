//! Token allotment: crediting purchased tokens to an agent's per-model balance.
//!
//! The arithmetic lives in [`credit_account`] and [`apply_model_status`], which operate on
//! an in-memory [`AgentTokenAccount`]. Storage backends load the account under a lock (row
//! lock in Postgres, entry lock in the memory store), run these functions and write the
//! result back, so both backends share exactly the same rules.
//!
//! [`TokenAllotmentEngine`] is the public entry point. It validates the request, checks the
//! model against the pricing catalog and then hands over to the storage backend.

use crate::db::errors::DbError;
use crate::db::handlers::repository::{AgentAccounts, PricingCatalog, Repositories};
use crate::db::models::agents::{AgentTokenAccount, TokenBalance, UsingModel};
use crate::types::{MAX_SAFE_TOKENS, TokenStatus, same_model};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;

#[derive(Debug, thiserror::Error)]
pub enum AllotmentError {
    #[error("Invalid token amount: {0}")]
    InvalidAmount(String),

    #[error("AI model {0} not found")]
    ModelNotFound(String),

    #[error("AI model {0} is no longer available")]
    ModelUnavailable(String),

    #[error("Agent not found")]
    AgentNotFound,

    #[error("Agent is owned by another user")]
    NotAgentOwner,

    #[error("Agent has no token balance for model {0}")]
    BalanceNotFound(String),

    #[error("Token balance would exceed the maximum supported amount")]
    TokenAmountOverflow,

    #[error(transparent)]
    Database(#[from] DbError),
}

impl From<sqlx::Error> for AllotmentError {
    fn from(err: sqlx::Error) -> Self {
        AllotmentError::Database(err.into())
    }
}

/// Free-form context echoed back with an allotment
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct AllotmentMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AllotmentRequest {
    pub username: String,
    pub agent_id: String,
    pub model_name: String,
    pub tokens: i64,
    /// Allotments sharing a key credit at most once per user
    pub idempotency_key: Option<String>,
    pub metadata: AllotmentMetadata,
}

/// What a storage backend reports after crediting an account
#[derive(Debug, Clone, PartialEq)]
pub struct AccountCredit {
    pub balance: TokenBalance,
    /// The agent's `usingModel`, only when it mirrors the credited model
    pub using_model: Option<UsingModel>,
    /// Set when the idempotency key had already been seen and nothing was credited
    pub replayed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Allotment {
    pub agent_id: String,
    pub tokens: i64,
    pub balance: TokenBalance,
    pub using_model: Option<UsingModel>,
    pub metadata: AllotmentMetadata,
    pub replayed: bool,
}

/// Reject amounts that are not positive, above `max_tokens` or outside the safe integer range
pub fn validate_amount(tokens: i64, max_tokens: i64) -> Result<(), AllotmentError> {
    if tokens <= 0 {
        return Err(AllotmentError::InvalidAmount("tokens must be a positive integer".to_string()));
    }
    if tokens > max_tokens {
        return Err(AllotmentError::InvalidAmount(format!("tokens cannot exceed {max_tokens}")));
    }
    if tokens >= MAX_SAFE_TOKENS {
        return Err(AllotmentError::InvalidAmount("tokens exceed the supported range".to_string()));
    }
    Ok(())
}

fn checked_credit(current: i64, tokens: i64) -> Result<i64, AllotmentError> {
    current
        .checked_add(tokens)
        .filter(|total| *total <= MAX_SAFE_TOKENS)
        .ok_or(AllotmentError::TokenAmountOverflow)
}

/// Credit `tokens` of `model_name` to `account`.
///
/// The matching balance (case-insensitive) is incremented, or a new balance with the
/// default status is appended. A `usingModel` pointing at the same model is incremented by
/// the same amount; a `usingModel` for any other model is left alone. Nothing is modified
/// when an error is returned.
pub fn credit_account(
    account: &mut AgentTokenAccount,
    username: &str,
    model_name: &str,
    tokens: i64,
    now: DateTime<Utc>,
) -> Result<AccountCredit, AllotmentError> {
    if account.username != username {
        return Err(AllotmentError::NotAgentOwner);
    }

    let existing = account.balance_index(model_name);
    let new_total = match existing {
        Some(index) => checked_credit(account.token_balances[index].available_tokens, tokens)?,
        None => checked_credit(0, tokens)?,
    };
    let mirror_total = match account.using_model.as_ref() {
        Some(using) if same_model(&using.model_name, model_name) => Some(checked_credit(using.available_tokens, tokens)?),
        _ => None,
    };

    let index = match existing {
        Some(index) => {
            let balance = &mut account.token_balances[index];
            balance.available_tokens = new_total;
            balance.updated_at = now;
            index
        }
        None => {
            account.token_balances.push(TokenBalance {
                model_name: model_name.to_string(),
                available_tokens: new_total,
                status: TokenStatus::default(),
                created_at: now,
                updated_at: now,
            });
            account.token_balances.len() - 1
        }
    };

    if let (Some(total), Some(using)) = (mirror_total, account.using_model.as_mut()) {
        using.available_tokens = total;
    }
    account.last_modified = now;

    Ok(AccountCredit {
        balance: account.token_balances[index].clone(),
        using_model: mirror_total.and(account.using_model.clone()),
        replayed: false,
    })
}

/// The result an already-applied allotment would have reported
pub fn replayed_credit(account: &AgentTokenAccount, model_name: &str) -> Result<AccountCredit, AllotmentError> {
    let balance = account
        .balance(model_name)
        .cloned()
        .ok_or_else(|| AllotmentError::BalanceNotFound(model_name.to_string()))?;
    let using_model = account.using_model.clone().filter(|u| same_model(&u.model_name, model_name));
    Ok(AccountCredit {
        balance,
        using_model,
        replayed: true,
    })
}

/// Switch the status of one model balance.
///
/// Activating a model makes it the agent's `usingModel` and deactivates every other
/// balance. Deactivating the model currently in use clears `usingModel`.
pub fn apply_model_status(
    account: &mut AgentTokenAccount,
    username: &str,
    model_name: &str,
    status: TokenStatus,
    now: DateTime<Utc>,
) -> Result<(), AllotmentError> {
    if account.username != username {
        return Err(AllotmentError::NotAgentOwner);
    }
    let index = account
        .balance_index(model_name)
        .ok_or_else(|| AllotmentError::BalanceNotFound(model_name.to_string()))?;

    match status {
        TokenStatus::Active => {
            for (i, balance) in account.token_balances.iter_mut().enumerate() {
                let target = if i == index { TokenStatus::Active } else { TokenStatus::Inactive };
                if balance.status != target {
                    balance.status = target;
                    balance.updated_at = now;
                }
            }
            account.using_model = Some(UsingModel::from(&account.token_balances[index]));
        }
        TokenStatus::Inactive => {
            let balance = &mut account.token_balances[index];
            balance.status = TokenStatus::Inactive;
            balance.updated_at = now;
            if account.is_using(model_name) {
                account.using_model = None;
            }
        }
    }
    account.last_modified = now;
    Ok(())
}

/// Credits purchased tokens to agents
#[derive(Clone)]
pub struct TokenAllotmentEngine {
    pricing: Arc<dyn PricingCatalog>,
    agents: Arc<dyn AgentAccounts>,
    max_tokens_per_allotment: i64,
}

impl TokenAllotmentEngine {
    pub fn new(repos: &Repositories, max_tokens_per_allotment: i64) -> Self {
        Self {
            pricing: repos.pricing.clone(),
            agents: repos.agents.clone(),
            max_tokens_per_allotment,
        }
    }

    #[instrument(skip(self, request), fields(agent_id = %request.agent_id, model = %request.model_name, tokens = request.tokens), err)]
    pub async fn allot(&self, request: &AllotmentRequest) -> Result<Allotment, AllotmentError> {
        self.allot_at(request, Utc::now()).await
    }

    pub async fn allot_at(&self, request: &AllotmentRequest, now: DateTime<Utc>) -> Result<Allotment, AllotmentError> {
        validate_amount(request.tokens, self.max_tokens_per_allotment)?;

        let model = self
            .pricing
            .get_model(&request.model_name)
            .await?
            .ok_or_else(|| AllotmentError::ModelNotFound(request.model_name.clone()))?;
        if !model.is_available_at(now) {
            return Err(AllotmentError::ModelUnavailable(model.model_name));
        }

        let credit = self.agents.credit_tokens(request, now).await?;

        if credit.replayed {
            info!(
                key = request.idempotency_key.as_deref().unwrap_or_default(),
                "Allotment already applied, nothing credited"
            );
        } else {
            metrics::counter!("tokctl_tokens_allotted_total", "model" => credit.balance.model_name.clone())
                .increment(request.tokens as u64);
            info!(balance = credit.balance.available_tokens, "Tokens allotted");
        }

        Ok(Allotment {
            agent_id: request.agent_id.clone(),
            tokens: request.tokens,
            balance: credit.balance,
            using_model: credit.using_model,
            metadata: request.metadata.clone(),
            replayed: credit.replayed,
        })
    }

    /// Toggle a model balance on behalf of the agent's owner
    #[instrument(skip(self), err)]
    pub async fn set_model_status(
        &self,
        username: &str,
        agent_id: &str,
        model_name: &str,
        status: TokenStatus,
    ) -> Result<AgentTokenAccount, AllotmentError> {
        self.agents.set_model_status(username, agent_id, model_name, status, Utc::now()).await
    }
}
