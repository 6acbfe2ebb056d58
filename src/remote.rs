//! The remote document store as seen by the write path.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::db::{Operation, QueueItem};
use crate::error::RemoteError;

/// Placeholder in collection paths replaced by the item's owner.
const OWNER_PLACEHOLDER: &str = "{userId}";

/// Applies one queued mutation to the remote store.
///
/// Implementations must be safe to call again for an item whose earlier
/// attempt failed; a failed attempt leaves the item pending.
#[async_trait]
pub trait RemoteApply: Send + Sync {
  async fn apply(&self, item: &QueueItem) -> Result<(), RemoteError>;
}

/// REST client for the document store.
///
/// Documents live at `{base_url}/{collection}/{document_id}`:
/// - create with an id -> `PUT`, create without one -> `POST` to the collection
/// - update -> `PATCH`
/// - delete -> `DELETE`
#[derive(Clone)]
pub struct HttpDocumentStore {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpDocumentStore {
  pub fn new(base_url: Url, timeout: Duration) -> Result<Self, RemoteError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| RemoteError::other(format!("failed to build document store client: {}", e)))?;
    Ok(Self { client, base_url })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  /// Health endpoint used by the internal reachability check.
  pub fn health_url(&self) -> Result<Url, RemoteError> {
    self.url_for(&["health"])
  }

  fn document_url(&self, item: &QueueItem) -> Result<Url, RemoteError> {
    let collection = item.collection.replace(OWNER_PLACEHOLDER, &item.owner_id);
    let mut segments: Vec<&str> = collection.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
      return Err(RemoteError::InvalidMutation(format!(
        "queue item {} has an empty collection",
        item.id
      )));
    }
    if let Some(doc_id) = item.document_id.as_deref() {
      segments.push(doc_id);
    }
    self.url_for(&segments)
  }

  fn url_for(&self, segments: &[&str]) -> Result<Url, RemoteError> {
    let mut url = self.base_url.clone();
    url
      .path_segments_mut()
      .map_err(|_| RemoteError::other(format!("{} cannot be a base url", self.base_url)))?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  fn request_for(item: &QueueItem) -> Result<(Method, bool), RemoteError> {
    let needs_id = |op: Operation| {
      RemoteError::InvalidMutation(format!("{} of queue item {} has no document id", op, item.id))
    };
    match (item.operation, item.document_id.is_some()) {
      (Operation::Create, true) => Ok((Method::PUT, true)),
      (Operation::Create, false) => Ok((Method::POST, true)),
      (Operation::Update, true) => Ok((Method::PATCH, true)),
      (Operation::Delete, true) => Ok((Method::DELETE, false)),
      (op, false) => Err(needs_id(op)),
    }
  }
}

#[async_trait]
impl RemoteApply for HttpDocumentStore {
  async fn apply(&self, item: &QueueItem) -> Result<(), RemoteError> {
    let (method, with_body) = Self::request_for(item)?;
    let url = self.document_url(item)?;
    debug!(queue_id = item.id, %method, %url, "applying queued mutation");

    let mut request = self.client.request(method, url);
    if with_body {
      request = request.json(&item.payload);
    }
    let response = request.send().await?;

    let status = response.status();
    // Deleting a document that is already gone is the outcome we wanted.
    if status.is_success() || (item.operation == Operation::Delete && status == StatusCode::NOT_FOUND) {
      return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::Rejected {
      status: status.as_u16(),
      message: body.chars().take(200).collect(),
    })
  }
}
