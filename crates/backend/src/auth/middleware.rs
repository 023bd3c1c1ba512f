//! Bearer-token checks for routes that read a user's scan history.

use axum::http::{header, HeaderMap};

use crate::error::{ApiError, ApiResult};
use crate::graph::{GraphClient, GraphError};

/// Token from an `Authorization: Bearer <token>` header, if present and non-empty.
pub fn extract_token_from_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Check that `token` belongs to the owner of `user_email`.
///
/// The owner is looked up with the provider's profile endpoint. A token the
/// provider refuses is treated as missing authentication; any other lookup
/// failure is a 500.
pub async fn authorize_mailbox_access(
    graph: &GraphClient,
    token: &str,
    user_email: &str,
) -> ApiResult<()> {
    let principal = match graph.user_principal_name(token).await {
        Ok(principal) => principal,
        Err(GraphError::Rejected { status: 401 }) => {
            tracing::warn!("Provider rejected bearer token");
            return Err(ApiError::Unauthorized(
                "Invalid or expired token".to_string(),
            ));
        }
        Err(e) => {
            tracing::error!("Profile lookup failed: {}", e);
            return Err(ApiError::Internal("Failed to verify user".to_string()));
        }
    };

    if !principal.eq_ignore_ascii_case(user_email) {
        tracing::warn!(
            "User {} tried to access emails for {}",
            principal,
            user_email
        );
        return Err(ApiError::Forbidden(
            "Not authorized to access these emails".to_string(),
        ));
    }

    Ok(())
}
