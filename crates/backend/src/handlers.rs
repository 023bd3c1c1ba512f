use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, PathRejection},
        Json, Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use shared_types::{
    EmailListQuery, PhishingEmailsQuery, PredictRequest, ScanRecord, StoreEmailRequest,
    UpdateStatusRequest, Verdict,
};

use crate::auth::{authorize_mailbox_access, extract_token_from_header};
use crate::error::{ApiError, ApiResult};
use crate::models::NewScanRecord;
use crate::repository::StoreError;
use crate::scanner::{jobs_from_notifications, ChangeNotificationCollection};
use crate::AppState;

pub async fn health_check() -> StatusCode {
    StatusCode::OK
}

// Classification

/// Classify a batch of email bodies. One verdict per input, in input order.
pub async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> ApiResult<Json<Vec<String>>> {
    let Json(request) = payload?;
    tracing::info!("Classifying {} emails", request.emails.len());

    let verdicts = state.classifier.classify_all(&request.emails).await;
    Ok(Json(verdicts))
}

// Notification receiver

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationParams {
    pub validation_token: Option<String>,
}

/// Answer the subscription handshake, or queue a scan for every notified message.
///
/// Notifications are acknowledged with 202 before any scanning happens.
pub async fn receive_notification(
    State(state): State<AppState>,
    Query(params): Query<NotificationParams>,
    body: Bytes,
) -> Response {
    if let Some(token) = params.validation_token.filter(|t| !t.is_empty()) {
        tracing::info!("Answering notification URL validation");
        return (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            token,
        )
            .into_response();
    }

    let batch = if body.is_empty() {
        ChangeNotificationCollection::default()
    } else {
        match serde_json::from_slice::<ChangeNotificationCollection>(&body) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!("Ignoring unparseable notification payload: {}", e);
                ChangeNotificationCollection::default()
            }
        }
    };

    let jobs = jobs_from_notifications(batch, &state.config.provider.client_state);
    let queued = jobs
        .into_iter()
        .filter(|job| state.scan_queue.enqueue(job.clone()))
        .count();
    tracing::info!("Accepted notification, {} messages queued for scanning", queued);

    StatusCode::ACCEPTED.into_response()
}

// Scan record handlers

/// A user's classified emails, newest message date first.
///
/// The bearer token must belong to the queried user.
pub async fn list_phishing_emails(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PhishingEmailsQuery>,
) -> ApiResult<Json<Vec<ScanRecord>>> {
    let token = extract_token_from_header(&headers)
        .ok_or_else(|| ApiError::Unauthorized("Authorization header required".to_string()))?;

    let user_email = query
        .user_email
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("User email is required"))?;

    authorize_mailbox_access(&state.graph, &token, &user_email).await?;

    let records = state.store.list_by_date(&user_email).await?;
    Ok(Json(records))
}

pub async fn store_email(
    State(state): State<AppState>,
    payload: Result<Json<StoreEmailRequest>, JsonRejection>,
) -> ApiResult<Json<ScanRecord>> {
    let Json(request) = payload?;
    let verdict = parse_verdict(&request.status)?;

    let record = state
        .store
        .insert(NewScanRecord::from_request(request, verdict))
        .await?;
    tracing::info!("Stored email {} for {}", record.id, record.user_email);

    Ok(Json(record))
}

/// A user's classified emails, most recently stored first.
pub async fn list_emails(
    State(state): State<AppState>,
    Query(query): Query<EmailListQuery>,
) -> ApiResult<Json<Vec<ScanRecord>>> {
    let user_id = query
        .user_id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("User ID is required"))?;

    let records = state.store.list_by_created(&user_id).await?;
    Ok(Json(records))
}

/// Override the verdict of one record. Only "Phishing" and "Safe" are accepted.
pub async fn update_email_status(
    State(state): State<AppState>,
    id: Result<Path<i32>, PathRejection>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> ApiResult<Json<ScanRecord>> {
    let Path(id) = id?;
    let Json(request) = payload?;
    tracing::info!("Updating status of email {} to {}", id, request.status);

    let verdict = Verdict::parse_user_override(&request.status)
        .ok_or_else(|| StoreError::InvalidStatus(request.status.clone()))?;

    let record = state.store.update_verdict(id, verdict).await?;
    Ok(Json(record))
}

/// Store a classified email once per (user, subject, sender, date).
pub async fn store_scanned_email(
    State(state): State<AppState>,
    payload: Result<Json<StoreEmailRequest>, JsonRejection>,
) -> ApiResult<Json<ScanRecord>> {
    let Json(request) = payload?;
    let verdict = parse_verdict(&request.status)?;

    let record = state
        .store
        .upsert(NewScanRecord::from_request(request, verdict))
        .await?;
    Ok(Json(record))
}

fn parse_verdict(status: &str) -> Result<Verdict, StoreError> {
    Verdict::parse(status).ok_or_else(|| StoreError::InvalidStatus(status.to_string()))
}
