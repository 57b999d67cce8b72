use std::fmt;
use url::{Origin, Url};

use crate::net::Request;

/// Extensions served cache-first.
const STATIC_EXTENSIONS: &[&str] = &[".svg", ".css", ".js"];

/// The request-handling policy chosen for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
  CacheFirst,
  NetworkFirst,
  StaleWhileRevalidate,
  NetworkFirstWithStore,
}

impl StrategyKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::CacheFirst => "cache-first",
      Self::NetworkFirst => "network-first-generic",
      Self::StaleWhileRevalidate => "stale-while-revalidate",
      Self::NetworkFirstWithStore => "network-first-with-structured-fallback",
    }
  }
}

impl fmt::Display for StrategyKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Classifies requests by origin, path and accept type.
#[derive(Debug, Clone)]
pub struct Dispatcher {
  api_origin: Origin,
}

impl Dispatcher {
  pub fn new(api_origin: &Url) -> Self {
    Self {
      api_origin: api_origin.origin(),
    }
  }

  /// Pick the strategy for a request. First matching rule wins.
  pub fn classify(&self, request: &Request) -> StrategyKind {
    if request.url.origin() == self.api_origin {
      return StrategyKind::NetworkFirstWithStore;
    }

    let path = request.url.path();
    if STATIC_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
      return StrategyKind::CacheFirst;
    }

    if request.accepts_html() {
      return StrategyKind::StaleWhileRevalidate;
    }

    StrategyKind::NetworkFirst
  }
}
