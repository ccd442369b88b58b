use crate::allotment::{Allotment, AllotmentMetadata};
use crate::db::models::agents::{AgentTokenAccount, TokenBalance, UsingModel};
use crate::types::TokenStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalanceView {
    pub model_name: String,
    pub available_tokens: i64,
    pub status: TokenStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TokenBalance> for TokenBalanceView {
    fn from(balance: TokenBalance) -> Self {
        Self {
            model_name: balance.model_name,
            available_tokens: balance.available_tokens,
            status: balance.status,
            created_at: balance.created_at,
            updated_at: balance.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UsingModelView {
    pub model_name: String,
    pub available_tokens: i64,
    pub status: TokenStatus,
}

impl From<UsingModel> for UsingModelView {
    fn from(using: UsingModel) -> Self {
        Self {
            model_name: using.model_name,
            available_tokens: using.available_tokens,
            status: using.status,
        }
    }
}

/// An agent's balances as shown to its owner
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AgentTokensResponse {
    pub success: bool,
    pub agent_id: String,
    pub token_balances: Vec<TokenBalanceView>,
    pub using_model: Option<UsingModelView>,
    pub last_modified: DateTime<Utc>,
}

impl From<AgentTokenAccount> for AgentTokensResponse {
    fn from(account: AgentTokenAccount) -> Self {
        Self {
            success: true,
            agent_id: account.agent_id,
            token_balances: account.token_balances.into_iter().map(Into::into).collect(),
            using_model: account.using_model.map(Into::into),
            last_modified: account.last_modified,
        }
    }
}

/// Body of `PATCH /agents/{agent_id}/tokens/{model_name}/status`
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ModelStatusUpdate {
    pub status: TokenStatus,
}

/// Outcome of crediting tokens to an agent
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AllotmentView {
    pub agent_id: String,
    /// Tokens requested by this allotment
    pub tokens: i64,
    /// The credited balance after the allotment
    pub balance: TokenBalanceView,
    /// Present when the agent is using the credited model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub using_model: Option<UsingModelView>,
    pub metadata: AllotmentMetadata,
    /// True when this allotment had already been applied and nothing was credited
    pub replayed: bool,
}

impl From<Allotment> for AllotmentView {
    fn from(allotment: Allotment) -> Self {
        Self {
            agent_id: allotment.agent_id,
            tokens: allotment.tokens,
            balance: allotment.balance.into(),
            using_model: allotment.using_model.map(Into::into),
            metadata: allotment.metadata,
            replayed: allotment.replayed,
        }
    }
}
