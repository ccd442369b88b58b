//! Database models for agent token accounts.
//!
//! An account holds one balance row per model (matched case-insensitively) and an optional
//! `using_model` snapshot of the balance the agent currently serves from. Whenever the
//! snapshot's model is topped up or toggled, both copies are updated in the same write.

use crate::types::{TokenStatus, same_model};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tokens available to an agent for one model
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct TokenBalance {
    pub model_name: String,
    pub available_tokens: i64,
    pub status: TokenStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Mirror of the balance the agent is currently using
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsingModel {
    pub model_name: String,
    pub available_tokens: i64,
    pub status: TokenStatus,
}

impl From<&TokenBalance> for UsingModel {
    fn from(balance: &TokenBalance) -> Self {
        Self {
            model_name: balance.model_name.clone(),
            available_tokens: balance.available_tokens,
            status: balance.status,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentTokenAccount {
    pub agent_id: String,
    pub username: String,
    pub token_balances: Vec<TokenBalance>,
    pub using_model: Option<UsingModel>,
    pub last_modified: DateTime<Utc>,
}

impl AgentTokenAccount {
    /// Create an empty account for a freshly registered agent
    pub fn new(agent_id: impl Into<String>, username: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            agent_id: agent_id.into(),
            username: username.into(),
            token_balances: Vec::new(),
            using_model: None,
            last_modified: now,
        }
    }

    pub fn balance_index(&self, model_name: &str) -> Option<usize> {
        self.token_balances.iter().position(|b| same_model(&b.model_name, model_name))
    }

    pub fn balance(&self, model_name: &str) -> Option<&TokenBalance> {
        self.balance_index(model_name).map(|i| &self.token_balances[i])
    }

    /// Whether `using_model` is set and refers to `model_name`
    pub fn is_using(&self, model_name: &str) -> bool {
        self.using_model.as_ref().is_some_and(|u| same_model(&u.model_name, model_name))
    }
}
