//! HTTP routes exposing sync status and manual sync.

use axum::{
  extract::State,
  http::StatusCode,
  response::{IntoResponse, Response},
  routing::{get, post},
  Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::error::StoreError;
use crate::offline::{OfflineService, SyncStatus};
use crate::queue::DrainOutcome;

/// Internal failure surfaced as a bare 500; the detail only goes to the log.
#[derive(Debug)]
pub struct ApiError(StoreError);

impl From<StoreError> for ApiError {
  fn from(err: StoreError) -> Self {
    ApiError(err)
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    error!(error = %self.0, "request failed");
    (
      StatusCode::INTERNAL_SERVER_ERROR,
      Json(json!({ "error": "internal server error" })),
    )
      .into_response()
  }
}

pub fn create_router(service: Arc<OfflineService>) -> Router {
  Router::new()
    .route("/offline/status", get(sync_status))
    .route("/offline/sync", post(sync_now))
    .layer(TraceLayer::new_for_http())
    .with_state(service)
}

async fn sync_status(State(service): State<Arc<OfflineService>>) -> Result<Json<SyncStatus>, ApiError> {
  Ok(Json(service.get_sync_status()?))
}

async fn sync_now(State(service): State<Arc<OfflineService>>) -> Result<Json<DrainOutcome>, ApiError> {
  Ok(Json(service.sync_now().await?))
}
