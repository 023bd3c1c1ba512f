//! Notification-driven scan pipeline.
//!
//! The notification handler turns each change notification into a `ScanJob`
//! and pushes it onto a bounded queue without waiting. A single background
//! worker drains the queue: fetch the message, classify its body, upsert the
//! verdict. Transient upstream failures are retried with exponential backoff.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use shared_types::{ScanRecord, Verdict};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::auth::CredentialStore;
use crate::classifier::{ClassificationClient, ClassificationError};
use crate::graph::{GraphClient, GraphError};
use crate::models::NewScanRecord;
use crate::repository::{SharedStore, StoreError};

/// Payload the provider POSTs to the notification URL
#[derive(Debug, Default, Deserialize)]
pub struct ChangeNotificationCollection {
    #[serde(default)]
    pub value: Vec<ChangeNotification>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    #[serde(default)]
    pub resource: String,
    pub client_state: Option<String>,
    pub change_type: Option<String>,
    pub resource_data: Option<ResourceData>,
}

#[derive(Debug, Deserialize)]
pub struct ResourceData {
    pub id: Option<String>,
}

impl ChangeNotification {
    /// Id of the changed message: `resourceData.id`, else the last segment of
    /// `resource` (`Users/{user}/Messages/{id}`).
    pub fn message_id(&self) -> Option<String> {
        let from_data = self
            .resource_data
            .as_ref()
            .and_then(|d| d.id.as_deref())
            .filter(|id| !id.is_empty());
        if let Some(id) = from_data {
            return Some(id.to_string());
        }

        let (parent, id) = self.resource.trim_end_matches('/').rsplit_once('/')?;
        if parent.to_ascii_lowercase().ends_with("messages") && !id.is_empty() {
            Some(id.to_string())
        } else {
            None
        }
    }
}

/// One message waiting to be scanned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanJob {
    pub message_id: String,
}

/// Jobs for every notification that carries the expected client state and
/// names a message.
pub fn jobs_from_notifications(
    batch: ChangeNotificationCollection,
    expected_client_state: &str,
) -> Vec<ScanJob> {
    batch
        .value
        .into_iter()
        .filter_map(|notification| {
            if notification.client_state.as_deref() != Some(expected_client_state) {
                tracing::warn!(
                    "Ignoring notification for {} with unexpected client state",
                    notification.resource
                );
                return None;
            }
            match notification.message_id() {
                Some(message_id) => Some(ScanJob { message_id }),
                None => {
                    tracing::warn!(
                        "Ignoring notification without message id: {}",
                        notification.resource
                    );
                    None
                }
            }
        })
        .collect()
}

/// Sending half of the scan queue, held by the HTTP handlers.
#[derive(Debug, Clone)]
pub struct ScanQueue {
    tx: mpsc::Sender<ScanJob>,
}

impl ScanQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ScanJob>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue a job without waiting. Returns false if it was dropped.
    pub fn enqueue(&self, job: ScanJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                tracing::warn!("Scan queue full, dropping message {}", job.message_id);
                false
            }
            Err(TrySendError::Closed(job)) => {
                tracing::error!("Scan worker stopped, dropping message {}", job.message_id);
                false
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("no signed-in user to fetch messages with")]
    NoCredential,

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Classification(#[from] ClassificationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ScanError {
    fn is_transient(&self) -> bool {
        match self {
            ScanError::NoCredential => false,
            ScanError::Graph(e) => e.is_transient(),
            ScanError::Classification(e) => e.is_transient(),
            ScanError::Store(e) => matches!(e, StoreError::Pool(_) | StoreError::Persistence(_)),
        }
    }
}

/// What happened to one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Stored(ScanRecord),
    /// Classifier answered with a label outside the verdict set.
    Unclassified(String),
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Run `operation`, retrying transient failures with doubling delays.
    async fn run<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T, ScanError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ScanError>>,
    {
        let mut delay = self.initial_delay;
        let mut attempts = 0;

        loop {
            attempts += 1;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() && attempts <= self.max_retries => {
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name,
                        attempts,
                        self.max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, self.max_delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Background consumer of the scan queue
#[derive(Clone)]
pub struct ScanWorker {
    pub credentials: CredentialStore,
    pub graph: GraphClient,
    pub classifier: ClassificationClient,
    pub store: SharedStore,
    pub retry: RetryPolicy,
}

impl ScanWorker {
    pub fn spawn(self, rx: mpsc::Receiver<ScanJob>) -> JoinHandle<()> {
        tokio::spawn(self.run(rx))
    }

    async fn run(self, mut rx: mpsc::Receiver<ScanJob>) {
        tracing::info!("Scan worker started");

        while let Some(job) = rx.recv().await {
            match self.process(&job).await {
                Ok(ScanOutcome::Stored(record)) => {
                    tracing::info!(
                        "Scanned message {}: {} (record {})",
                        job.message_id,
                        record.status,
                        record.id
                    );
                }
                Ok(ScanOutcome::Unclassified(label)) => {
                    tracing::warn!(
                        "Message {} not stored, classifier returned '{}'",
                        job.message_id,
                        label
                    );
                }
                Err(e) => {
                    tracing::error!("Failed to scan message {}: {}", job.message_id, e);
                }
            }
        }

        tracing::info!("Scan queue closed, worker exiting");
    }

    /// Fetch, classify and store one message.
    pub async fn process(&self, job: &ScanJob) -> Result<ScanOutcome, ScanError> {
        let token = self
            .credentials
            .current()
            .await
            .ok_or(ScanError::NoCredential)?;

        let graph = &self.graph;
        let classifier = &self.classifier;
        let store = &self.store;
        let token = token.as_str();
        let message_id = job.message_id.as_str();

        let user_email = self
            .retry
            .run("Profile lookup", move || async move {
                graph.user_principal_name(token).await.map_err(ScanError::from)
            })
            .await?;

        let message = self
            .retry
            .run("Message fetch", move || async move {
                graph.fetch_message(message_id, token).await.map_err(ScanError::from)
            })
            .await?;

        let body = message.body.as_str();
        let label = self
            .retry
            .run("Classification", move || async move {
                classifier.classify_one(body).await.map_err(ScanError::from)
            })
            .await?;

        let Some(verdict) = Verdict::parse(&label) else {
            return Ok(ScanOutcome::Unclassified(label));
        };

        let record = NewScanRecord::new(
            user_email,
            message.subject,
            message.sender,
            message.date,
            message.body,
            verdict,
        );

        let record = &record;
        let stored = self
            .retry
            .run("Store scan record", move || async move {
                store.upsert(record.clone()).await.map_err(ScanError::from)
            })
            .await?;

        Ok(ScanOutcome::Stored(stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderConfig, DEFAULT_CLIENT_STATE, DEFAULT_SCOPE};
    use crate::repository::{MemoryScanStore, ScanRecordStore};
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notification(body: serde_json::Value) -> ChangeNotificationCollection {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_message_id_from_resource_data() {
        let batch = notification(json!({"value": [{
            "resource": "Users/u1/Messages/ignored",
            "clientState": "secretClientValue",
            "resourceData": {"id": "AAMkAD="}
        }]}));
        let jobs = jobs_from_notifications(batch, "secretClientValue");
        assert_eq!(
            jobs,
            vec![ScanJob {
                message_id: "AAMkAD=".to_string()
            }]
        );
    }

    #[test]
    fn test_message_id_from_resource_path() {
        let batch = notification(json!({"value": [{
            "resource": "Users/u1/Messages/m-42",
            "clientState": "secretClientValue"
        }]}));
        let jobs = jobs_from_notifications(batch, "secretClientValue");
        assert_eq!(jobs[0].message_id, "m-42");
    }

    #[test]
    fn test_wrong_client_state_and_unknown_resources_skipped() {
        let batch = notification(json!({"value": [
            {"resource": "Users/u1/Messages/m1", "clientState": "forged"},
            {"resource": "Users/u1/Messages/m2"},
            {"resource": "Users/u1/Events/e1", "clientState": "secretClientValue"},
            {"resource": "Users/u1/Messages/m3", "clientState": "secretClientValue"}
        ]}));
        let jobs = jobs_from_notifications(batch, "secretClientValue");
        assert_eq!(
            jobs,
            vec![ScanJob {
                message_id: "m3".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_queue_drops_when_full() {
        let (queue, mut rx) = ScanQueue::channel(1);
        assert!(queue.enqueue(ScanJob {
            message_id: "a".to_string()
        }));
        assert!(!queue.enqueue(ScanJob {
            message_id: "b".to_string()
        }));
        assert_eq!(rx.recv().await.unwrap().message_id, "a");
    }

    async fn worker_for(server: &MockServer, store: Arc<MemoryScanStore>) -> ScanWorker {
        let provider = ProviderConfig {
            tenant_id: "t".to_string(),
            client_id: "c".to_string(),
            client_secret: "s".to_string(),
            redirect_uri: String::new(),
            scope: DEFAULT_SCOPE.to_string(),
            notification_url: String::new(),
            client_state: DEFAULT_CLIENT_STATE.to_string(),
            graph_base_url: server.uri(),
            login_base_url: server.uri(),
        };
        let http = reqwest::Client::new();
        let credentials = CredentialStore::new();
        credentials.store("tok".to_string()).await;

        ScanWorker {
            credentials,
            graph: GraphClient::new(http.clone(), &provider),
            classifier: ClassificationClient::new(http, format!("{}/predict", server.uri())),
            store,
            retry: RetryPolicy {
                max_retries: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
        }
    }

    async fn mount_mailbox(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "userPrincipalName": "alice@contoso.com"
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/me/messages/m1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "subject": "Account locked",
                "from": {"emailAddress": {"address": "it@evil.test"}},
                "receivedDateTime": "2024-05-01T10:00:00Z",
                "body": {"content": "<p>Dear user, verify your account now</p>"}
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_process_stores_verdict() {
        let server = MockServer::start().await;
        mount_mailbox(&server).await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(["Phishing"])))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryScanStore::new());
        let worker = worker_for(&server, store.clone()).await;
        let job = ScanJob {
            message_id: "m1".to_string(),
        };

        let outcome = worker.process(&job).await.unwrap();
        let ScanOutcome::Stored(record) = outcome else {
            panic!("expected a stored record");
        };
        assert_eq!(record.user_email, "alice@contoso.com");
        assert_eq!(record.subject, "Account locked");
        assert_eq!(record.sender, "it@evil.test");
        assert_eq!(record.status, "Phishing");

        // A repeated notification for the same message does not add a row.
        worker.process(&job).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(
            store.list_by_date("alice@contoso.com").await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_process_retries_transient_classifier_failure() {
        let server = MockServer::start().await;
        mount_mailbox(&server).await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(["Safe"])))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryScanStore::new());
        let worker = worker_for(&server, store.clone()).await;
        let outcome = worker
            .process(&ScanJob {
                message_id: "m1".to_string(),
            })
            .await
            .unwrap();
        assert!(matches!(outcome, ScanOutcome::Stored(ref r) if r.status == "Safe"));
    }

    #[tokio::test]
    async fn test_classifier_rejection_is_not_retried() {
        let server = MockServer::start().await;
        mount_mailbox(&server).await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryScanStore::new());
        let worker = worker_for(&server, store.clone()).await;
        let err = worker
            .process(&ScanJob {
                message_id: "m1".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScanError::Classification(ClassificationError::Status { status: 400 })
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_unknown_label_not_stored() {
        let server = MockServer::start().await;
        mount_mailbox(&server).await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(["Maybe"])))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryScanStore::new());
        let worker = worker_for(&server, store.clone()).await;
        let outcome = worker
            .process(&ScanJob {
                message_id: "m1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(outcome, ScanOutcome::Unclassified("Maybe".to_string()));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_missing_message_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "userPrincipalName": "alice@contoso.com"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/me/messages/gone"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryScanStore::new());
        let worker = worker_for(&server, store).await;
        let err = worker
            .process(&ScanJob {
                message_id: "gone".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScanError::Graph(GraphError::Rejected { status: 404 })
        ));
    }

    #[tokio::test]
    async fn test_no_credential() {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryScanStore::new());
        let mut worker = worker_for(&server, store).await;
        worker.credentials = CredentialStore::new();

        let err = worker
            .process(&ScanJob {
                message_id: "m1".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::NoCredential));
    }
}
