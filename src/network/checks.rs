//! Reachability checks used by the monitor.

use async_trait::async_trait;
use std::time::Duration;
use url::Url;

use crate::error::RemoteError;

/// A single, cheap connectivity probe.
///
/// The monitor bounds every call by [`ReachabilityCheck::timeout`] and treats
/// errors, timeouts and panics alike as "unreachable".
#[async_trait]
pub trait ReachabilityCheck: Send + Sync {
  /// Short name for logs.
  fn name(&self) -> &str;

  fn timeout(&self) -> Duration {
    Duration::from_secs(5)
  }

  async fn check(&self) -> Result<(), RemoteError>;
}

/// HTTP GET probe. Any response below 500 counts as reachable.
pub struct HttpCheck {
  name: String,
  client: reqwest::Client,
  url: Url,
  timeout: Duration,
}

impl HttpCheck {
  pub fn new(name: impl Into<String>, url: Url, timeout: Duration) -> Result<Self, RemoteError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| RemoteError::other(format!("failed to build probe client: {}", e)))?;

    Ok(Self {
      name: name.into(),
      client,
      url,
      timeout,
    })
  }

  pub fn url(&self) -> &Url {
    &self.url
  }
}

#[async_trait]
impl ReachabilityCheck for HttpCheck {
  fn name(&self) -> &str {
    &self.name
  }

  fn timeout(&self) -> Duration {
    self.timeout
  }

  async fn check(&self) -> Result<(), RemoteError> {
    let response = self.client.get(self.url.clone()).send().await?;
    let status = response.status();
    if status.is_server_error() {
      return Err(RemoteError::Rejected {
        status: status.as_u16(),
        message: format!("{} answered {}", self.url, status),
      });
    }
    Ok(())
  }
}
