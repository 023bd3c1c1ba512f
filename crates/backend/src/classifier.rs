//! Client for the external phishing classification service.
//!
//! The service takes `{"emails": [...]}` and answers with one verdict string per
//! email, in order. Bodies are stripped of all markup before they are sent.

use std::collections::HashSet;

use reqwest::Client;
use shared_types::{PredictRequest, VERDICT_ERROR};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("classification request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("classification service returned HTTP {status}")]
    Status { status: u16 },

    #[error("classification response is not a JSON array: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("classification service returned no predictions")]
    EmptyPrediction,
}

impl ClassificationError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ClassificationError::Transport(_) => true,
            ClassificationError::Status { status } => *status == 429 || *status >= 500,
            ClassificationError::Decode(_) | ClassificationError::EmptyPrediction => false,
        }
    }
}

/// Strip every tag from an email body. Script and style contents are dropped
/// along with their tags; text is kept, entity-escaped.
pub fn sanitize(body: &str) -> String {
    let mut builder = ammonia::Builder::empty();
    builder.clean_content_tags(HashSet::from(["script", "style"]));
    builder.clean(body).to_string()
}

#[derive(Clone)]
pub struct ClassificationClient {
    http: Client,
    url: String,
}

impl ClassificationClient {
    pub fn new(http: Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }

    /// Classify all bodies with a single request.
    ///
    /// The result has exactly one slot per input. Slots the service left out or
    /// answered with something other than a string hold `"error"`.
    pub async fn classify_batch(&self, bodies: &[String]) -> Result<Vec<String>, ClassificationError> {
        if bodies.is_empty() {
            return Ok(Vec::new());
        }

        let request = PredictRequest {
            emails: bodies.iter().map(|b| sanitize(b)).collect(),
        };

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(ClassificationError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClassificationError::Status {
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(ClassificationError::Transport)?;
        let predictions: Vec<serde_json::Value> =
            serde_json::from_slice(&bytes).map_err(ClassificationError::Decode)?;

        if predictions.is_empty() {
            return Err(ClassificationError::EmptyPrediction);
        }
        if predictions.len() != bodies.len() {
            tracing::warn!(
                "Classifier returned {} verdicts for {} emails",
                predictions.len(),
                bodies.len()
            );
        }

        tracing::debug!("Classified {} emails", bodies.len());
        Ok(align_verdicts(predictions, bodies.len()))
    }

    /// Classify a single body.
    pub async fn classify_one(&self, body: &str) -> Result<String, ClassificationError> {
        let mut verdicts = self.classify_batch(&[body.to_string()]).await?;
        verdicts.pop().ok_or(ClassificationError::EmptyPrediction)
    }

    /// Classify all bodies, never failing as a whole.
    ///
    /// Tries one batch first. If the batch fails, each body is sent on its own
    /// and any body that still fails gets `"error"`.
    pub async fn classify_all(&self, bodies: &[String]) -> Vec<String> {
        match self.classify_batch(bodies).await {
            Ok(verdicts) => return verdicts,
            Err(e) => {
                tracing::warn!("Batch classification failed, retrying per email: {}", e);
            }
        }

        let mut verdicts = Vec::with_capacity(bodies.len());
        for (index, body) in bodies.iter().enumerate() {
            match self.classify_one(body).await {
                Ok(verdict) => verdicts.push(verdict),
                Err(e) => {
                    tracing::warn!("Prediction failed for email {}: {}", index, e);
                    verdicts.push(VERDICT_ERROR.to_string());
                }
            }
        }
        verdicts
    }
}

/// Trim or pad `predictions` to `expected` slots, mapping non-strings to `"error"`.
fn align_verdicts(predictions: Vec<serde_json::Value>, expected: usize) -> Vec<String> {
    let mut verdicts: Vec<String> = predictions
        .into_iter()
        .take(expected)
        .map(|value| match value {
            serde_json::Value::String(label) => label,
            _ => VERDICT_ERROR.to_string(),
        })
        .collect();
    verdicts.resize(expected, VERDICT_ERROR.to_string());
    verdicts
}
