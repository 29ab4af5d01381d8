//! Prediction Routes

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use batch_coordinator::{InferenceStatus, ItemResult, RequestItem};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::ApiError;
use crate::AppState;

/// Name used when an upload carries no filename
pub const UNNAMED: &str = "unnamed";

/// Response for the batch endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchResponse {
    pub predictions: Vec<ItemResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Classify one uploaded image (multipart field `file`)
pub async fn predict(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<ItemResult>, ApiError> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await? {
        if upload.is_some() || field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or(UNNAMED).to_string();
        let payload = field.bytes().await?.to_vec();
        upload = Some((name, payload));
    }

    let (name, payload) = upload.ok_or(ApiError::MissingField("file"))?;
    state.requests_served.fetch_add(1, Ordering::Relaxed);

    let coordinator = state.coordinator.clone();
    let log_name = name.clone();
    let result = tokio::task::spawn_blocking(move || coordinator.predict_one(name, &payload))
        .await?
        .map_err(|e| {
            error!("Prediction for {} failed: {}", log_name, e);
            ApiError::from(e)
        })?;

    Ok(Json(result))
}

/// Classify many uploaded images (repeated multipart field `files`)
///
/// Every file gets an entry in `predictions`, in upload order, whether it
/// succeeded or not.
pub async fn predict_batch(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<BatchResponse>), ApiError> {
    let limit = state.max_batch_items;
    let mut uploads: Vec<(String, Vec<u8>)> = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("files") {
            continue;
        }
        if uploads.len() >= limit {
            warn!("Rejecting batch with more than {} files", limit);
            return Err(ApiError::TooManyFiles { limit });
        }
        let name = field.file_name().unwrap_or(UNNAMED).to_string();
        let payload = field.bytes().await?.to_vec();
        uploads.push((name, payload));
    }

    if uploads.is_empty() {
        return Err(ApiError::NoFiles);
    }
    state.requests_served.fetch_add(1, Ordering::Relaxed);

    let items = RequestItem::from_uploads(uploads);
    let coordinator = state.coordinator.clone();
    let outcome = tokio::task::spawn_blocking(move || coordinator.run(items)).await?;
    let summary = &outcome.summary;

    info!(
        "Batch {} processed {} of {} images",
        summary.request_id, summary.preprocessed, summary.total
    );

    let (status, detail) = match &summary.inference {
        InferenceStatus::Succeeded => (StatusCode::OK, None),
        InferenceStatus::Skipped => (
            StatusCode::OK,
            Some("None of the uploaded images could be processed".to_string()),
        ),
        InferenceStatus::Failed(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Some("Batch inference failed".to_string()),
        ),
    };

    Ok((
        status,
        Json(BatchResponse {
            predictions: outcome.results,
            detail,
        }),
    ))
}
