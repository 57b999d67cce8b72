//! Request-handling strategies over the blob cache, the record store and the network.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};
use url::Url;

use super::collection::collection_for_url;
use super::dispatch::{Dispatcher, StrategyKind};
use crate::cache::{BlobCache, CacheRole, Generations};
use crate::net::{Fetcher, Request, Response, ResponseSource};
use crate::store::{LocalStore, Record, RecordBackend};

/// Strategy engine bound to one deployed version's cache generations.
///
/// Every strategy resolves to a `Response`; failures of the network, the
/// cache or the store only steer the fallback chain.
pub struct Engine<C: BlobCache, B: RecordBackend, F: Fetcher> {
  caches: Arc<C>,
  store: LocalStore<B>,
  fetcher: Arc<F>,
  generations: Generations,
  dispatcher: Dispatcher,
  offline_page: Request,
}

impl<C: BlobCache, B: RecordBackend, F: Fetcher> Engine<C, B, F> {
  pub fn new(
    caches: Arc<C>,
    store: LocalStore<B>,
    fetcher: Arc<F>,
    generations: Generations,
    dispatcher: Dispatcher,
    offline_page: Url,
  ) -> Self {
    Self {
      caches,
      store,
      fetcher,
      generations,
      dispatcher,
      offline_page: Request::get(offline_page),
    }
  }

  /// Classify the request and run the matching strategy.
  pub async fn handle(&self, request: &Request) -> Response {
    let kind = self.dispatcher.classify(request);
    debug!(method = %request.method, url = %request.url, strategy = %kind, "Dispatching request");

    match kind {
      StrategyKind::CacheFirst => self.cache_first(request).await,
      StrategyKind::NetworkFirst => self.network_first(request).await,
      StrategyKind::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
      StrategyKind::NetworkFirstWithStore => self.network_first_with_store(request).await,
    }
  }

  /// Serve from the static generation; only a miss touches the network.
  pub async fn cache_first(&self, request: &Request) -> Response {
    let generation = self.generations.name(CacheRole::Static);
    if let Some(hit) = lookup(&*self.caches, Some(generation.as_str()), request) {
      return hit;
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        remember(&*self.caches, &generation, request, &response);
        response
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "Fetch failed for uncached asset");
        Response::request_timeout()
      }
    }
  }

  /// Network first, then any cache generation, then the offline page or a 408.
  pub async fn network_first(&self, request: &Request) -> Response {
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        remember(
          &*self.caches,
          &self.generations.name(CacheRole::Dynamic),
          request,
          &response,
        );
        response
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "Fetch failed; falling back to cache");

        if let Some(hit) = lookup(&*self.caches, None, request) {
          return hit;
        }
        if request.accepts_html() {
          if let Some(page) = self.offline_page() {
            return page;
          }
        }
        Response::request_timeout()
      }
    }
  }

  /// Answer from cache at once while the network refreshes it for next time.
  ///
  /// The revalidation task is spawned before the cached entry is returned and
  /// runs to completion on its own; its result only reaches this caller when
  /// nothing was cached.
  pub async fn stale_while_revalidate(&self, request: &Request) -> Response {
    let cached = lookup(&*self.caches, None, request);

    let caches = Arc::clone(&self.caches);
    let fetcher = Arc::clone(&self.fetcher);
    let generation = self.generations.name(CacheRole::Dynamic);
    let owned = request.clone();
    let revalidate = tokio::spawn(async move {
      match fetcher.fetch(&owned).await {
        Ok(response) => {
          remember(&*caches, &generation, &owned, &response);
          Some(response)
        }
        Err(e) => {
          warn!(url = %owned.url, error = %e, "Revalidation fetch failed");
          None
        }
      }
    });

    if let Some(hit) = cached {
      return hit;
    }

    match revalidate.await {
      Ok(Some(response)) => response,
      Ok(None) if request.accepts_html() => {
        self.offline_page().unwrap_or_else(Response::network_error)
      }
      Ok(None) => Response::network_error(),
      Err(e) => {
        error!(url = %request.url, error = %e, "Revalidation task failed");
        Response::network_error()
      }
    }
  }

  /// API strategy: network, then data cache, then the record store, then the
  /// offline marker.
  ///
  /// A successful array response is also upserted into the record collection
  /// named by the first path segment. That write happens after the response
  /// is known to be good and cannot change it.
  pub async fn network_first_with_store(&self, request: &Request) -> Response {
    let generation = self.generations.name(CacheRole::Data);
    match self.fetcher.fetch(request).await {
      Ok(response) if response.is_ok() => {
        remember(&*self.caches, &generation, request, &response);
        self.hydrate(request, &response);
        return response;
      }
      Ok(response) => {
        warn!(url = %request.url, status = response.status, "API request failed; returning offline data");
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "API request failed; returning offline data");
      }
    }

    if let Some(hit) = lookup(&*self.caches, Some(generation.as_str()), request) {
      return hit;
    }

    if let Some(response) = self.from_store(request) {
      return response;
    }

    Response::offline_json()
  }

  /// Upsert every record of an array body into its collection.
  fn hydrate(&self, request: &Request, response: &Response) {
    let Some(collection) = collection_for_url(&request.url) else {
      return;
    };
    let Some(records) = decode_records(&response.body) else {
      debug!(url = %request.url, "Response is not a record array; skipping store");
      return;
    };

    let stored = records
      .iter()
      .filter(|record| self.store.put(collection, record))
      .count();
    debug!(%collection, stored, total = records.len(), "Stored API records");
  }

  /// Rebuild a JSON array response from the record store.
  fn from_store(&self, request: &Request) -> Option<Response> {
    if !request.is_get() {
      return None;
    }
    let collection = collection_for_url(&request.url)?;
    let records = self.store.get_all(collection);
    if records.is_empty() {
      return None;
    }

    match Response::json(&records) {
      Ok(response) => {
        debug!(%collection, count = records.len(), "Serving records from local store");
        Some(response.with_source(ResponseSource::Store))
      }
      Err(e) => {
        error!(%collection, error = %e, "Failed to serialize stored records");
        None
      }
    }
  }

  fn offline_page(&self) -> Option<Response> {
    lookup(&*self.caches, None, &self.offline_page)
  }
}

/// Cache lookup where storage failures count as a miss.
fn lookup<C: BlobCache>(caches: &C, generation: Option<&str>, request: &Request) -> Option<Response> {
  let result = match generation {
    Some(name) => caches.match_in(name, request),
    None => caches.match_any(request),
  };

  match result {
    Ok(Some(hit)) => {
      debug!(url = %request.url, cached_at = %hit.cached_at, "Cache hit");
      Some(hit.response)
    }
    Ok(None) => None,
    Err(e) => {
      error!(url = %request.url, error = %e, "Cache read failed; treating as miss");
      None
    }
  }
}

/// Best-effort write of a response duplicate. Only successful GETs are kept.
fn remember<C: BlobCache>(caches: &C, generation: &str, request: &Request, response: &Response) {
  if !request.is_get() || !response.is_ok() {
    return;
  }
  if let Err(e) = caches.put(generation, request, response) {
    error!(url = %request.url, generation, error = %e, "Cache write failed; skipping");
  }
}

fn decode_records(body: &[u8]) -> Option<Vec<Record>> {
  match serde_json::from_slice::<Value>(body).ok()? {
    Value::Array(items) => Some(items.into_iter().filter_map(Record::from_value).collect()),
    _ => None,
  }
}
