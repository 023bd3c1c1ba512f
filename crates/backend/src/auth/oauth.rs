//! Authorize URL construction and authorization-code exchange.

use reqwest::{Client, Url};

use super::types::{AuthError, TokenRequest, TokenResponse};
use crate::config::ProviderConfig;

/// Fixed `state` value sent with every authorize request.
pub const ANTI_FORGERY_STATE: &str = "12345";

#[derive(Clone)]
pub struct OAuthClient {
    http: Client,
    config: ProviderConfig,
}

impl OAuthClient {
    pub fn new(http: Client, config: ProviderConfig) -> Self {
        Self { http, config }
    }

    /// `{login_base}/{tenant}/oauth2/v2.0/{name}`, with the tenant encoded as a path segment.
    fn endpoint(&self, name: &str) -> Result<Url, AuthError> {
        let mut url = Url::parse(&self.config.login_base_url)
            .map_err(|e| AuthError::InvalidEndpoint(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| {
                AuthError::InvalidEndpoint(format!(
                    "{} cannot be used as a base URL",
                    self.config.login_base_url
                ))
            })?
            .pop_if_empty()
            .extend([self.config.tenant_id.as_str(), "oauth2", "v2.0", name]);
        Ok(url)
    }

    /// URL the browser is sent to for consent.
    pub fn authorize_url(&self) -> Result<String, AuthError> {
        let mut url = self.endpoint("authorize")?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("response_mode", "query")
            .append_pair("scope", &self.config.scope)
            .append_pair("prompt", "consent")
            .append_pair("state", ANTI_FORGERY_STATE);
        Ok(url.into())
    }

    /// Exchange an authorization code for an access token.
    ///
    /// Token type and expiry in the response are not checked.
    pub async fn exchange_code(&self, code: &str) -> Result<String, AuthError> {
        let response = self
            .http
            .post(self.endpoint("token")?)
            .form(&TokenRequest {
                client_id: &self.config.client_id,
                scope: &self.config.scope,
                code,
                redirect_uri: &self.config.redirect_uri,
                grant_type: "authorization_code",
                client_secret: &self.config.client_secret,
            })
            .send()
            .await
            .map_err(AuthError::TokenExchange)?;

        let status = response.status();
        let body = response.text().await.map_err(AuthError::TokenExchange)?;
        tracing::info!("Token endpoint returned HTTP {}", status);

        let tokens: TokenResponse = serde_json::from_str(&body).map_err(AuthError::TokenDecode)?;

        match tokens.access_token.filter(|t| !t.is_empty()) {
            Some(token) => Ok(token),
            None => {
                tracing::warn!(
                    "Token response without access_token: {} {}",
                    tokens.error.as_deref().unwrap_or("unknown_error"),
                    tokens.error_description.as_deref().unwrap_or_default()
                );
                Err(AuthError::TokenMissing)
            }
        }
    }
}
