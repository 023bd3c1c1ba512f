//! OAuth authorization-code login against the identity provider.
//!
//! This module provides:
//! - Authorize URL construction and the code-for-token exchange
//! - The process-wide credential slot filled by a successful callback
//! - Bearer-token extraction and mailbox ownership checks for protected routes
//! - `/auth`, `/callback`, `/subscribe` and `/me` handlers

mod credentials;
mod handlers;
mod middleware;
mod oauth;
pub mod types;

pub use credentials::CredentialStore;
pub use handlers::{auth_callback, start_auth, subscribe, whoami};
pub use middleware::{authorize_mailbox_access, extract_token_from_header};
pub use oauth::OAuthClient;
pub use types::AuthError;
