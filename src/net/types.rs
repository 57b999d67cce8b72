//! Request and response descriptors passed through the caching layer.

use reqwest::Method;
use serde::Serialize;
use std::collections::BTreeMap;
use url::Url;

/// Body returned when nothing can be served and the network is gone.
const NETWORK_ERROR_BODY: &[u8] = b"Network error";

/// An incoming request as seen by the dispatcher.
///
/// Header names are stored lowercased so lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: BTreeMap<String, String>,
  /// Request body, forwarded to the network but never part of the cache identity
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: BTreeMap::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self
      .headers
      .insert(name.to_ascii_lowercase(), value.to_string());
    self
  }

  pub fn with_body(mut self, body: Vec<u8>) -> Self {
    self.body = Some(body);
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .map(String::as_str)
  }

  /// Whether the declared accept type asks for an HTML document.
  pub fn accepts_html(&self) -> bool {
    self
      .header("accept")
      .is_some_and(|accept| accept.contains("text/html"))
  }

  pub fn is_get(&self) -> bool {
    self.method == Method::GET
  }
}

/// Where a response handed back to the caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseSource {
  /// Fresh data from network
  #[default]
  Network,
  /// Replayed from a cache generation
  Cache,
  /// Rebuilt from the structured local store
  Store,
  /// Produced locally because no data was available
  Synthetic,
}

/// A captured response: status, headers and a fully buffered body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
  pub source: ResponseSource,
}

impl Response {
  pub fn new(status: u16, body: Vec<u8>) -> Self {
    Self {
      status,
      headers: BTreeMap::new(),
      body,
      source: ResponseSource::Network,
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self
      .headers
      .insert(name.to_ascii_lowercase(), value.to_string());
    self
  }

  pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
    self.headers.extend(
      headers
        .into_iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value)),
    );
    self
  }

  pub fn with_source(mut self, source: ResponseSource) -> Self {
    self.source = source;
    self
  }

  /// Serialize `value` into a `200 application/json` response.
  pub fn json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Self> {
    let body = serde_json::to_vec(value)?;
    Ok(Self::new(200, body).with_header("content-type", "application/json"))
  }

  /// Synthetic `408` returned when neither network nor cache can answer.
  pub fn request_timeout() -> Self {
    Self::new(408, NETWORK_ERROR_BODY.to_vec())
      .with_header("content-type", "text/plain")
      .with_source(ResponseSource::Synthetic)
  }

  /// JSON marker served to API consumers when no data exists anywhere.
  pub fn offline_json() -> Self {
    Self::new(
      200,
      br#"{"offline":true,"message":"No internet connection"}"#.to_vec(),
    )
    .with_header("content-type", "application/json")
    .with_source(ResponseSource::Synthetic)
  }

  /// The "no response" result: the caller sees a network error.
  pub fn network_error() -> Self {
    Self::new(0, Vec::new()).with_source(ResponseSource::Synthetic)
  }

  pub fn is_network_error(&self) -> bool {
    self.status == 0
  }

  /// Status in the 2xx range.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .map(String::as_str)
  }
}
