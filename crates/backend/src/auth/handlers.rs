//! Authentication HTTP handlers.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};

use super::oauth::ANTI_FORGERY_STATE;
use super::types::{AuthError, CallbackParams};
use crate::error::ApiResult;
use crate::AppState;

/// Start the OAuth login flow by redirecting to the provider's consent page.
pub async fn start_auth(State(state): State<AppState>) -> ApiResult<Redirect> {
    let url = state.oauth.authorize_url()?;
    tracing::info!("Redirecting to provider login");
    Ok(Redirect::to(&url))
}

/// Handle the provider's redirect back with an authorization code.
///
/// On success the access token replaces whatever the credential slot held.
pub async fn auth_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> ApiResult<&'static str> {
    if let Some(error) = params.error.as_deref() {
        tracing::warn!(
            "Provider returned error on callback: {} {}",
            error,
            params.error_description.as_deref().unwrap_or_default()
        );
    }

    if params.state.as_deref() != Some(ANTI_FORGERY_STATE) {
        tracing::warn!("Callback state does not match the authorize request");
    }

    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or(AuthError::MissingCode)?;

    let token = state.oauth.exchange_code(&code).await?;
    state.credentials.store(token).await;

    tracing::info!("Successful login, access token stored");
    Ok("Auth successful. Now call /subscribe to register for notifications.")
}

/// Register the inbox webhook using the stored token.
///
/// The provider's response body is returned verbatim.
pub async fn subscribe(State(state): State<AppState>) -> ApiResult<Response> {
    let token = state.credentials.require().await?;
    let response = state.graph.create_subscription(&token).await?;

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    if !status.is_success() {
        tracing::warn!("Provider rejected subscription with HTTP {}", status);
    }

    Ok((status, response.body).into_response())
}

/// Proxy the provider's profile lookup for the signed-in user.
pub async fn whoami(State(state): State<AppState>) -> ApiResult<Response> {
    let token = state.credentials.require().await?;
    let response = state.graph.me(&token).await?;

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    Ok((status, response.body).into_response())
}
