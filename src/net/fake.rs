//! Scripted fetcher for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{FetchError, Fetcher, Request, Response};

/// Serves canned responses by URL and counts every network call.
///
/// Unknown URLs answer `404`. When offline, every call fails with
/// `FetchError::Network`.
#[derive(Default)]
pub struct ScriptedFetcher {
  routes: Mutex<HashMap<String, Response>>,
  calls: AtomicUsize,
  offline: AtomicBool,
  delay: Option<Duration>,
}

impl ScriptedFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Delay every response, to observe what a strategy does while waiting.
  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  pub fn route(self, url: &str, response: Response) -> Self {
    self.set_route(url, response);
    self
  }

  pub fn set_route(&self, url: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    if self.offline.load(Ordering::SeqCst) {
      return Err(FetchError::Network("offline".to_string()));
    }

    let routes = self.routes.lock().unwrap();
    Ok(
      routes
        .get(request.url.as_str())
        .cloned()
        .unwrap_or_else(|| Response::new(404, b"Not found".to_vec())),
    )
  }
}
