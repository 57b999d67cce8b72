//! Periodic check for a newly deployed version.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::net::{Fetcher, Request};

#[derive(Deserialize)]
struct VersionDocument {
  version: String,
}

/// Asks the deployment which version is current.
///
/// The endpoint answers either `{"version": "v3"}` or the bare version string.
pub struct UpdateChecker<F: Fetcher> {
  fetcher: Arc<F>,
  url: Url,
  interval: Duration,
}

impl<F: Fetcher> UpdateChecker<F> {
  pub fn new(fetcher: Arc<F>, url: Url, interval: Duration) -> Self {
    Self {
      fetcher,
      url,
      interval,
    }
  }

  pub fn interval(&self) -> Duration {
    self.interval
  }

  /// The deployed version, if it differs from `current`.
  pub async fn check(&self, current: &str) -> Result<Option<String>> {
    let request = Request::get(self.url.clone()).with_header("cache-control", "no-cache");
    let response = self
      .fetcher
      .fetch(&request)
      .await
      .map_err(|e| eyre!("Update check against {} failed: {}", self.url, e))?;

    if !response.is_ok() {
      return Err(eyre!(
        "Update check against {} returned status {}",
        self.url,
        response.status
      ));
    }

    let deployed = parse_version(&response.body)?;
    Ok((deployed != current).then_some(deployed))
  }
}

fn parse_version(body: &[u8]) -> Result<String> {
  let version = match serde_json::from_slice::<VersionDocument>(body) {
    Ok(document) => document.version,
    Err(_) => std::str::from_utf8(body)
      .map_err(|e| eyre!("Version document is not UTF-8: {}", e))?
      .trim()
      .to_string(),
  };

  // The version ends up in cache generation names
  let valid = !version.is_empty()
    && version
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
  if !valid {
    return Err(eyre!("Invalid deployed version: {:?}", version));
  }

  Ok(version)
}
