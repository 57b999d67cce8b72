//! Core traits and types for the blob cache.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use sha2::{Digest, Sha256};

use crate::net::{Request, Response};

/// A cached response together with its capture time.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  pub cached_at: DateTime<Utc>,
}

/// Named containers of request → response pairs.
///
/// Mirrors the browser Cache Storage surface: generations are opened by name,
/// entries are matched by request identity, and whole generations are deleted
/// at once. `put` opens the generation implicitly.
pub trait BlobCache: Send + Sync + 'static {
  /// Create the generation if it does not exist yet.
  fn open(&self, name: &str) -> Result<()>;

  fn has(&self, name: &str) -> Result<bool>;

  /// Generation names in creation order.
  fn keys(&self) -> Result<Vec<String>>;

  /// Drop a generation and every entry in it. Returns whether it existed.
  fn delete(&self, name: &str) -> Result<bool>;

  /// Number of entries stored in a generation.
  fn len(&self, name: &str) -> Result<usize>;

  /// Look up a request in one generation.
  fn match_in(&self, name: &str, request: &Request) -> Result<Option<CachedResponse>>;

  /// Look up a request across all generations, oldest generation first.
  fn match_any(&self, request: &Request) -> Result<Option<CachedResponse>>;

  /// Store (or overwrite) the entry for a request.
  fn put(&self, name: &str, request: &Request, response: &Response) -> Result<()>;
}

/// Normalized identity of a request: method + URL, fragment dropped, body ignored.
pub fn request_key(request: &Request) -> String {
  let mut url = request.url.clone();
  url.set_fragment(None);

  // SHA256 hash for stable, fixed-length keys
  let mut hasher = Sha256::new();
  hasher.update(request.method.as_str().as_bytes());
  hasher.update(b" ");
  hasher.update(url.as_str().as_bytes());
  hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::Method;
  use url::Url;

  fn request(method: Method, url: &str) -> Request {
    Request::new(method, Url::parse(url).unwrap())
  }

  #[test]
  fn test_key_ignores_fragment_and_body() {
    let plain = request(Method::GET, "http://localhost/doctors");
    let decorated = request(Method::GET, "http://localhost/doctors#top").with_body(b"x".to_vec());
    assert_eq!(request_key(&plain), request_key(&decorated));
  }

  #[test]
  fn test_key_depends_on_method_and_query() {
    let get = request(Method::GET, "http://localhost/doctors");
    let post = request(Method::POST, "http://localhost/doctors");
    let query = request(Method::GET, "http://localhost/doctors?page=2");
    assert_ne!(request_key(&get), request_key(&post));
    assert_ne!(request_key(&get), request_key(&query));
  }

  #[test]
  fn test_key_ignores_headers() {
    let bare = request(Method::GET, "http://localhost/");
    let html = request(Method::GET, "http://localhost/").with_header("accept", "text/html");
    assert_eq!(request_key(&bare), request_key(&html));
  }
}
