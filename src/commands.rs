//! CLI commands and argument parsing helpers
use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde_json::Value;

use crate::store::{Collection, Record};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Handle one request through the worker and print the response
  Fetch {
    /// Absolute URL, or a path resolved against app_origin
    url: String,

    /// Accept header, e.g. text/html for a page navigation
    #[arg(short, long)]
    accept: Option<String>,

    #[arg(short = 'X', long, default_value = "GET", value_parser = parse_method)]
    method: Method,

    /// Request body
    #[arg(short, long)]
    data: Option<String>,
  },

  /// Pre-cache the warm set for the configured version
  Install,

  /// Install the configured version, then activate it and evict stale caches
  Activate,

  /// List cache generations and their entry counts
  Caches,

  /// Inspect or edit the record store
  Store {
    #[arg(value_parser = parse_collection)]
    collection: Collection,

    #[command(subcommand)]
    action: StoreAction,
  },

  /// Keep running and check for new deployments
  Watch,
}

#[derive(Subcommand, Debug)]
pub enum StoreAction {
  /// Print every record ordered by id
  List,
  Get {
    id: String,
  },
  /// Write a JSON object, or an array of objects in one transaction
  Put {
    json: String,
  },
  Delete {
    id: String,
  },
  Clear,
  /// Look records up through a secondary index
  Find {
    index: String,
    value: String,
  },
}

fn parse_collection(input: &str) -> Result<Collection, String> {
  input.parse().map_err(|e: color_eyre::Report| e.to_string())
}

fn parse_method(input: &str) -> Result<Method, String> {
  Method::from_bytes(input.to_ascii_uppercase().as_bytes()).map_err(|e| e.to_string())
}

/// Records from a JSON object or array of objects.
pub fn parse_records(json: &str) -> Result<Vec<Record>> {
  let value: Value = serde_json::from_str(json).map_err(|e| eyre!("Invalid JSON: {}", e))?;
  let items = match value {
    Value::Array(items) => items,
    other => vec![other],
  };

  items
    .into_iter()
    .map(|item| Record::from_value(item).ok_or_else(|| eyre!("Records must be JSON objects")))
    .collect()
}

/// Index values are matched as JSON, so `7` finds numeric ids and `cardiology`
/// a string.
pub fn parse_index_value(raw: &str) -> Value {
  serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
