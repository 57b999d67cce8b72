//! Network seam: the fetch capability every strategy consumes.

mod client;
#[cfg(test)]
pub mod fake;
mod types;

use async_trait::async_trait;
use thiserror::Error;

pub use client::HttpFetcher;
pub use types::{Request, Response, ResponseSource};

/// Ways a network exchange can fail before a response arrives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
  #[error("Network error: {0}")]
  Network(String),

  #[error("Request timed out: {0}")]
  Timeout(String),

  #[error("Invalid request: {0}")]
  InvalidRequest(String),
}

/// Something that can exchange a request for a response over the network.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}
