//! Mail API client: webhook subscriptions, message lookup and profile lookup.

use chrono::{Duration, SecondsFormat, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ProviderConfig;

/// Folder watched for new messages.
pub const INBOX_RESOURCE: &str = "me/mailFolders('Inbox')/messages";

/// Lifetime requested for a new subscription. The provider drops it afterwards.
const SUBSCRIPTION_LIFETIME_MINUTES: i64 = 60;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("subscription request failed: {0}")]
    SubscriptionRequest(#[source] reqwest::Error),

    #[error("message fetch failed: {0}")]
    Fetch(#[source] reqwest::Error),

    #[error("message response is not valid JSON: {0}")]
    MalformedMessage(#[source] serde_json::Error),

    #[error("profile lookup failed: {0}")]
    Profile(#[source] reqwest::Error),

    #[error("mail API returned HTTP {status}")]
    Rejected { status: u16 },
}

impl GraphError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            GraphError::SubscriptionRequest(_) | GraphError::Fetch(_) | GraphError::Profile(_) => {
                true
            }
            GraphError::Rejected { status } => *status == 429 || *status >= 500,
            GraphError::MalformedMessage(_) => false,
        }
    }
}

/// Body of `POST /subscriptions`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest<'a> {
    pub change_type: &'a str,
    pub notification_url: &'a str,
    pub resource: &'a str,
    pub expiration_date_time: String,
    pub client_state: &'a str,
}

/// Provider response, passed back to the caller untouched.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    subject: Option<String>,
    from: Option<GraphRecipient>,
    received_date_time: Option<String>,
    body: Option<GraphBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphRecipient {
    email_address: Option<GraphEmailAddress>,
}

#[derive(Debug, Deserialize)]
struct GraphEmailAddress {
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphBody {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphProfile {
    user_principal_name: Option<String>,
    mail: Option<String>,
}

/// Message content needed to classify and store one email.
///
/// Missing fields come back as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedMessage {
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub date: String,
    pub body: String,
}

impl FetchedMessage {
    fn from_graph(id: &str, message: GraphMessage) -> Self {
        Self {
            id: id.to_string(),
            subject: message.subject.unwrap_or_default(),
            sender: message
                .from
                .and_then(|f| f.email_address)
                .and_then(|a| a.address)
                .unwrap_or_default(),
            date: message.received_date_time.unwrap_or_default(),
            body: message.body.and_then(|b| b.content).unwrap_or_default(),
        }
    }
}

/// Client for the mail API
#[derive(Clone)]
pub struct GraphClient {
    http: Client,
    base_url: String,
    notification_url: String,
    client_state: String,
}

impl GraphClient {
    pub fn new(http: Client, config: &ProviderConfig) -> Self {
        Self {
            http,
            base_url: config.graph_base_url.trim_end_matches('/').to_string(),
            notification_url: config.notification_url.clone(),
            client_state: config.client_state.clone(),
        }
    }

    /// Register a webhook for new inbox messages, valid for one hour.
    ///
    /// The returned subscription id is not tracked, so the registration cannot be
    /// renewed and lapses when it expires.
    pub async fn create_subscription(&self, token: &str) -> Result<RawResponse, GraphError> {
        let expiration = Utc::now() + Duration::minutes(SUBSCRIPTION_LIFETIME_MINUTES);
        let request = SubscriptionRequest {
            change_type: "created",
            notification_url: &self.notification_url,
            resource: INBOX_RESOURCE,
            expiration_date_time: expiration.to_rfc3339_opts(SecondsFormat::Secs, true),
            client_state: &self.client_state,
        };

        let response = self
            .http
            .post(format!("{}/subscriptions", self.base_url))
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(GraphError::SubscriptionRequest)?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(GraphError::SubscriptionRequest)?;

        tracing::info!("Subscription request returned HTTP {}", status);
        Ok(RawResponse { status, body })
    }

    /// Fetch one message by id.
    pub async fn fetch_message(
        &self,
        message_id: &str,
        token: &str,
    ) -> Result<FetchedMessage, GraphError> {
        let response = self
            .http
            .get(format!(
                "{}/me/messages/{}",
                self.base_url,
                urlencoding::encode(message_id)
            ))
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(GraphError::Fetch)?;

        let status = response.status();
        if !status.is_success() {
            return Err(GraphError::Rejected {
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(GraphError::Fetch)?;
        let message: GraphMessage =
            serde_json::from_slice(&bytes).map_err(GraphError::MalformedMessage)?;

        Ok(FetchedMessage::from_graph(message_id, message))
    }

    /// Body of a message, or an empty string if it has none.
    pub async fn fetch_message_body(
        &self,
        message_id: &str,
        token: &str,
    ) -> Result<String, GraphError> {
        Ok(self.fetch_message(message_id, token).await?.body)
    }

    /// Raw profile of the token's owner.
    pub async fn me(&self, token: &str) -> Result<RawResponse, GraphError> {
        let response = self
            .http
            .get(format!("{}/me", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(GraphError::Profile)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(GraphError::Profile)?;
        Ok(RawResponse { status, body })
    }

    /// Sign-in name of the token's owner, falling back to the primary address.
    pub async fn user_principal_name(&self, token: &str) -> Result<String, GraphError> {
        let response = self
            .http
            .get(format!("{}/me", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(GraphError::Profile)?;

        let status = response.status();
        if !status.is_success() {
            return Err(GraphError::Rejected {
                status: status.as_u16(),
            });
        }

        let profile: GraphProfile = response.json().await.map_err(GraphError::Profile)?;
        Ok(profile
            .user_principal_name
            .filter(|s| !s.is_empty())
            .or(profile.mail)
            .unwrap_or_default())
    }
}
