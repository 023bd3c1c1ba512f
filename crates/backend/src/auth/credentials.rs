//! Single-slot bearer token holder.

use std::sync::Arc;
use tokio::sync::Mutex;

use super::AuthError;

/// Holds the access token of the one signed-in identity.
///
/// A successful callback overwrites the slot; nothing clears it short of a
/// restart. Readers get a copy so the lock is never held across network calls.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    slot: Arc<Mutex<Option<String>>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn store(&self, token: String) {
        *self.slot.lock().await = Some(token);
    }

    pub async fn current(&self) -> Option<String> {
        self.slot.lock().await.clone()
    }

    /// Current token, or `Unauthenticated` if nobody has signed in yet.
    pub async fn require(&self) -> Result<String, AuthError> {
        self.current().await.ok_or(AuthError::Unauthenticated)
    }
}
