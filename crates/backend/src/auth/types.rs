//! Auth-related types and errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures of the login flow and of credential lookup.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authorization code missing from callback")]
    MissingCode,

    #[error("token request failed: {0}")]
    TokenExchange(#[source] reqwest::Error),

    #[error("token response is not valid JSON: {0}")]
    TokenDecode(#[source] serde_json::Error),

    #[error("token response has no access_token")]
    TokenMissing,

    #[error("no signed-in user")]
    Unauthenticated,

    #[error("identity provider endpoint is not a valid URL: {0}")]
    InvalidEndpoint(String),
}

/// Query string of the provider's redirect back to `/callback`
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Form body sent to the token endpoint
#[derive(Debug, Serialize)]
pub(crate) struct TokenRequest<'a> {
    pub client_id: &'a str,
    pub scope: &'a str,
    pub code: &'a str,
    pub redirect_uri: &'a str,
    pub grant_type: &'a str,
    pub client_secret: &'a str,
}

/// Token endpoint response. Both the success and the error shape decode into it.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}
