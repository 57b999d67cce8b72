//! Install, activate and supersede one deployed version.
//!
//! ```text
//! Parsed ─install─▶ Installing ─▶ Installed ─activate─▶ Activating ─▶ Activated
//!                        │                                  │             │
//!                        └──────── failure ─────────────────┴─▶ Redundant ◀┘ superseded
//! ```
//!
//! Installing never waits for an older version to release its clients: an
//! installed version may activate right away.

mod clients;
mod update;

use color_eyre::{eyre::eyre, Report, Result};
use futures::future::try_join_all;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::cache::{BlobCache, CacheRole, Generations};
use crate::event::{Notice, NoticeSender};
use crate::net::{Fetcher, Request};

pub use clients::Clients;
pub use update::UpdateChecker;

/// Lifecycle state of a deployed version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
  /// Known but not yet installed
  #[default]
  Parsed,
  Installing,
  /// Warm set cached, ready to activate
  Installed,
  Activating,
  /// Serving requests and controlling clients
  Activated,
  /// Failed or replaced by a newer version
  Redundant,
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Parsed => "parsed",
      Self::Installing => "installing",
      Self::Installed => "installed",
      Self::Activating => "activating",
      Self::Activated => "activated",
      Self::Redundant => "redundant",
    };
    f.write_str(name)
  }
}

/// What an activation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Activation {
  /// Generation names deleted as stale
  pub evicted: Vec<String>,
  /// Clients now controlled by this version
  pub claimed: Vec<String>,
}

/// Lifecycle controller for a single version.
pub struct Lifecycle<C: BlobCache, F: Fetcher> {
  caches: Arc<C>,
  fetcher: Arc<F>,
  generations: Generations,
  warm_set: Vec<Url>,
  state: WorkerState,
  notices: NoticeSender,
}

impl<C: BlobCache, F: Fetcher> Lifecycle<C, F> {
  pub fn new(
    caches: Arc<C>,
    fetcher: Arc<F>,
    generations: Generations,
    warm_set: Vec<Url>,
    notices: NoticeSender,
  ) -> Self {
    Self {
      caches,
      fetcher,
      generations,
      warm_set,
      state: WorkerState::Parsed,
      notices,
    }
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  pub fn version(&self) -> &str {
    self.generations.version()
  }

  pub fn generations(&self) -> &Generations {
    &self.generations
  }

  /// Whether a previous run already installed this version.
  pub fn is_provisioned(&self) -> Result<bool> {
    self.caches.has(&self.generations.name(CacheRole::Static))
  }

  fn set_state(&mut self, state: WorkerState) {
    self.state = state;
    let _ = self.notices.send(Notice::StateChange {
      version: self.version().to_string(),
      state,
    });
  }

  fn transition(&mut self, from: WorkerState, to: WorkerState) -> Result<()> {
    if self.state != from {
      return Err(eyre!(
        "Cannot move version {} to {} from {}",
        self.version(),
        to,
        self.state
      ));
    }
    self.set_state(to);
    Ok(())
  }

  /// Fetch the warm set and write it into the static generation.
  ///
  /// All-or-nothing: if any warm-set URL fails, nothing is written and the
  /// version becomes redundant.
  pub async fn install(&mut self) -> Result<usize> {
    self.transition(WorkerState::Parsed, WorkerState::Installing)?;

    match self.precache().await {
      Ok(count) => {
        info!(version = self.version(), cached = count, "Installed");
        self.set_state(WorkerState::Installed);
        Ok(count)
      }
      Err(e) => {
        self.set_state(WorkerState::Redundant);
        Err(e)
      }
    }
  }

  async fn precache(&self) -> Result<usize> {
    let requests: Vec<Request> = self.warm_set.iter().cloned().map(Request::get).collect();

    let responses = try_join_all(requests.iter().map(|request| async move {
      let response = self
        .fetcher
        .fetch(request)
        .await
        .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;
      if !response.is_ok() {
        return Err(eyre!(
          "Failed to fetch {}: status {}",
          request.url,
          response.status
        ));
      }
      Ok::<_, Report>(response)
    }))
    .await?;

    let name = self.generations.name(CacheRole::Static);
    let written = self.caches.open(&name).and_then(|()| {
      requests
        .iter()
        .zip(&responses)
        .try_for_each(|(request, response)| self.caches.put(&name, request, response))
    });

    // A partial static generation would pass for an installed version later
    if let Err(e) = written {
      if let Err(cleanup) = self.caches.delete(&name) {
        warn!(generation = %name, error = %cleanup, "Failed to remove partial install");
      }
      return Err(e);
    }

    Ok(responses.len())
  }

  /// Delete every generation this version does not own, then claim all clients.
  pub fn activate(&mut self, clients: &Clients) -> Result<Activation> {
    self.transition(WorkerState::Installed, WorkerState::Activating)?;
    self.finish_activation(clients)
  }

  fn finish_activation(&mut self, clients: &Clients) -> Result<Activation> {
    match self.evict_and_claim(clients) {
      Ok(activation) => {
        info!(
          version = self.version(),
          evicted = activation.evicted.len(),
          claimed = activation.claimed.len(),
          "Activated"
        );
        self.set_state(WorkerState::Activated);
        Ok(activation)
      }
      Err(e) => {
        self.set_state(WorkerState::Redundant);
        Err(e)
      }
    }
  }

  fn evict_and_claim(&self, clients: &Clients) -> Result<Activation> {
    let existing = self.caches.keys()?;
    let mut evicted = Vec::new();
    for name in self.generations.stale(&existing) {
      if self.caches.delete(name)? {
        info!(generation = name, "Deleted stale cache");
        evicted.push(name.to_string());
      }
    }

    let claimed = clients.claim(self.version())?;
    Ok(Activation { evicted, claimed })
  }

  /// Resume a version installed by an earlier run without reinstalling it.
  ///
  /// That run may have stopped after install, so stale generations are
  /// evicted exactly as on activation.
  pub fn restore(&mut self, clients: &Clients) -> Result<Activation> {
    self.transition(WorkerState::Parsed, WorkerState::Activating)?;
    self.finish_activation(clients)
  }

  /// Mark this version as replaced. Its engine still finishes in-flight work.
  pub fn supersede(&mut self) {
    if self.state != WorkerState::Redundant {
      self.set_state(WorkerState::Redundant);
    }
  }
}
