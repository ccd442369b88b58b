//! Request extractors for the authenticated principal.

use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::session,
    config::Config,
    errors::{Error, Result},
};
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use tracing::{instrument, trace};

/// Token from `Authorization: Bearer <jwt>`
/// Returns:
/// - None: no bearer credentials present
/// - Some(Ok(user)): token verified
/// - Some(Err(error)): header present but malformed, or token rejected
fn try_bearer_auth(headers: &HeaderMap, config: &Config) -> Option<Result<CurrentUser>> {
    let value = headers.get(header::AUTHORIZATION)?;
    let value = match value.to_str() {
        Ok(v) => v,
        Err(e) => {
            return Some(Err(Error::BadRequest {
                message: format!("Invalid authorization header: {e}"),
            }));
        }
    };
    let token = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))?;
    Some(session::verify_session_token(token.trim(), config))
}

/// Token from the session cookie. Stale cookies are skipped rather than reported.
fn try_cookie_auth(headers: &HeaderMap, config: &Config) -> Option<Result<CurrentUser>> {
    let cookie_name = &config.auth.session.cookie_name;
    let mut attempted = false;

    for cookie_header in headers.get_all(header::COOKIE) {
        let Ok(cookies) = cookie_header.to_str() else {
            continue;
        };
        for cookie in cookies.split(';') {
            if let Some((name, value)) = cookie.trim().split_once('=')
                && name == cookie_name
            {
                attempted = true;
                match session::verify_session_token(value, config) {
                    Ok(user) => return Some(Ok(user)),
                    Err(e) => trace!("Session cookie rejected: {}", e),
                }
            }
        }
    }

    attempted.then_some(Err(Error::Unauthenticated { message: None }))
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        // Header first, then cookie. Either succeeding is enough.
        let mut auth_errors = Vec::new();

        for (method, attempt) in [
            ("Bearer token", try_bearer_auth(&parts.headers, &state.config)),
            ("Session cookie", try_cookie_auth(&parts.headers, &state.config)),
        ] {
            match attempt {
                Some(Ok(user)) => {
                    trace!("Authenticated {} via {}", user.username, method);
                    return Ok(user);
                }
                Some(Err(e @ Error::Internal { .. })) => return Err(e),
                Some(Err(e)) => auth_errors.push((method, e)),
                None => {}
            }
        }

        if auth_errors.is_empty() {
            trace!("No authentication credentials found in request");
        } else {
            trace!("All authentication attempts failed: {:?}", auth_errors);
        }
        Err(Error::Unauthenticated { message: None })
    }
}

/// An authenticated principal with the admin flag set
#[derive(Debug, Clone)]
pub struct AdminUser(pub CurrentUser);

pub fn require_admin(user: CurrentUser) -> Result<CurrentUser> {
    if user.is_admin {
        Ok(user)
    } else {
        Err(Error::Forbidden {
            message: "Admin access required".to_string(),
        })
    }
}

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        require_admin(user).map(AdminUser)
    }
}
