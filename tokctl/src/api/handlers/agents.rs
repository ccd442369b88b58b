use crate::{
    AppState,
    api::{
        json::ApiJson,
        models::{
            agents::{AgentTokensResponse, ModelStatusUpdate},
            users::CurrentUser,
        },
    },
    errors::{AGENT_ACCESS_DENIED, Error, ErrorBody, Result},
};
use axum::{
    Json,
    extract::{Path, State},
};

/// Token balances of an agent the caller owns
#[utoipa::path(
    get,
    path = "/agents/{agent_id}/tokens",
    tag = "agents",
    summary = "Get an agent's token balances",
    params(("agent_id" = String, Path, description = "Agent identifier")),
    responses(
        (status = 200, description = "Balances and the model in use", body = AgentTokensResponse),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 403, description = "Agent not found or access denied", body = ErrorBody),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all, fields(agent_id = %agent_id))]
pub async fn get_agent_tokens(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    current_user: CurrentUser,
) -> Result<Json<AgentTokensResponse>> {
    match state.repos.agents.get_account(&agent_id).await? {
        Some(account) if account.username == current_user.username => Ok(Json(account.into())),
        _ => Err(Error::Forbidden {
            message: AGENT_ACCESS_DENIED.to_string(),
        }),
    }
}

/// Switch a model balance on or off. Activating a model makes it the one the agent uses.
#[utoipa::path(
    patch,
    path = "/agents/{agent_id}/tokens/{model_name}/status",
    tag = "agents",
    summary = "Set a model balance's status",
    params(
        ("agent_id" = String, Path, description = "Agent identifier"),
        ("model_name" = String, Path, description = "Model name, matched case-insensitively"),
    ),
    request_body = ModelStatusUpdate,
    responses(
        (status = 200, description = "Updated balances", body = AgentTokensResponse),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 403, description = "Agent not found or access denied", body = ErrorBody),
        (status = 404, description = "No balance for this model", body = ErrorBody),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all, fields(agent_id = %agent_id, model = %model_name))]
pub async fn set_model_status(
    State(state): State<AppState>,
    Path((agent_id, model_name)): Path<(String, String)>,
    current_user: CurrentUser,
    ApiJson(update): ApiJson<ModelStatusUpdate>,
) -> Result<Json<AgentTokensResponse>> {
    let account = state
        .engine()
        .set_model_status(&current_user.username, &agent_id, &model_name, update.status)
        .await?;
    Ok(Json(account.into()))
}
