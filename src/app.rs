use crate::cache::{BlobCache, Generations, SqliteBlobCache};
use crate::commands::{self, Command, StoreAction};
use crate::config::Config;
use crate::db;
use crate::event::{Notice, NoticeHandler};
use crate::lifecycle::UpdateChecker;
use crate::net::{HttpFetcher, Request, Response};
use crate::store::{Collection, LocalStore, RecordId, SqliteRecords};
use crate::worker::{ServiceWorker, WorkerEvent, WorkerOutcome};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

type Worker = ServiceWorker<SqliteBlobCache, SqliteRecords, HttpFetcher>;

/// Client id the CLI registers under while watching
const CLI_CLIENT: &str = "cli";

/// Main application state
pub struct App {
  /// Application configuration
  config: Config,

  worker: Worker,

  /// Shared with the worker; the update checker uses it too
  fetcher: Arc<HttpFetcher>,

  /// Worker notices (state changes, updates, controller changes)
  notices: NoticeHandler,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let data_dir = config.data_dir()?;
    let caches = Arc::new(SqliteBlobCache::open_at(&data_dir.join(db::CACHE_DB))?);
    let store = LocalStore::new(SqliteRecords::open_at(&data_dir.join(db::STORE_DB))?);
    let fetcher = Arc::new(HttpFetcher::new(config.request_timeout())?);
    let (tx, notices) = NoticeHandler::new();

    let worker = ServiceWorker::new(
      caches,
      store,
      Arc::clone(&fetcher),
      config.worker_settings()?,
      tx,
    );

    Ok(Self {
      config,
      worker,
      fetcher,
      notices,
    })
  }

  pub async fn run(&mut self, command: Command) -> Result<()> {
    match command {
      Command::Fetch {
        url,
        accept,
        method,
        data,
      } => self.fetch(&url, accept.as_deref(), method, data).await,
      Command::Install => self.install().await,
      Command::Activate => self.activate().await,
      Command::Caches => self.list_caches(),
      Command::Store { collection, action } => self.store(collection, action),
      Command::Watch => self.watch().await,
    }
  }

  async fn fetch(
    &mut self,
    url: &str,
    accept: Option<&str>,
    method: Method,
    data: Option<String>,
  ) -> Result<()> {
    // Without an active version requests still reach the network
    if let Err(e) = self.worker.boot().await {
      warn!(error = %e, "Worker failed to start; passing requests through");
    }

    let mut request = Request::new(method, self.config.resolve(url)?);
    if let Some(accept) = accept {
      request = request.with_header("accept", accept);
    }
    if let Some(data) = data {
      request = request
        .with_header("content-type", "application/json")
        .with_body(data.into_bytes());
    }

    let strategy = self.worker.classify(&request);
    match self.worker.handle(WorkerEvent::Fetch(request)).await? {
      WorkerOutcome::Responded(response) => {
        eprintln!("{} ({:?}, {})", status_line(&response), response.source, strategy);
        for (name, value) in &response.headers {
          eprintln!("{}: {}", name, value);
        }
        println!("{}", String::from_utf8_lossy(&response.body));
        Ok(())
      }
      other => Err(eyre!("Unexpected worker outcome: {:?}", other)),
    }
  }

  async fn install(&mut self) -> Result<()> {
    if let WorkerOutcome::Installed { version, cached } = self.worker.handle(WorkerEvent::Install).await? {
      println!("Installed {} ({} entries cached)", version, cached);
    }
    Ok(())
  }

  async fn activate(&mut self) -> Result<()> {
    self.worker.handle(WorkerEvent::Install).await?;
    if let WorkerOutcome::Activated { version, activation } =
      self.worker.handle(WorkerEvent::Activate).await?
    {
      println!("Activated {}", version);
      for name in &activation.evicted {
        println!("  deleted {}", name);
      }
    }
    Ok(())
  }

  fn list_caches(&self) -> Result<()> {
    let caches = self.worker.caches();
    let current = Generations::new(self.config.cache_prefix.as_deref(), &self.config.cache_version);
    for name in caches.keys()? {
      let marker = if current.is_current(&name) { "*" } else { " " };
      println!("{} {}\t{}", marker, name, caches.len(&name)?);
    }
    Ok(())
  }

  fn store(&self, collection: Collection, action: StoreAction) -> Result<()> {
    let store = self.worker.store();

    match action {
      StoreAction::List => print_json(&store.get_all(collection)),
      StoreAction::Get { id } => match store.get(collection, &RecordId::parse(&id)) {
        Some(record) => print_json(&record),
        None => Err(eyre!("No record {} in {}", id, collection)),
      },
      StoreAction::Put { json } => {
        let records = commands::parse_records(&json)?;
        if !store.put_many(collection, &records) {
          return Err(eyre!("Failed to write records to {}", collection));
        }
        println!("Stored {} record(s) in {}", records.len(), collection);
        Ok(())
      }
      StoreAction::Delete { id } => {
        if !store.delete(collection, &RecordId::parse(&id)) {
          return Err(eyre!("Failed to delete {} from {}", id, collection));
        }
        Ok(())
      }
      StoreAction::Clear => {
        if !store.clear(collection) {
          return Err(eyre!("Failed to clear {}", collection));
        }
        Ok(())
      }
      StoreAction::Find { index, value } => {
        if collection.index(&index).is_none() {
          return Err(eyre!("{} has no index {}", collection, index));
        }
        print_json(&store.find_by_index(collection, &index, &commands::parse_index_value(&value)))
      }
    }
  }

  /// Serve as a long-lived client: check for updates on the configured
  /// interval and report worker notices until interrupted.
  async fn watch(&mut self) -> Result<()> {
    let url = self
      .config
      .update_url()?
      .ok_or_else(|| eyre!("No update.url configured; nothing to watch"))?;

    self.worker.clients().add(CLI_CLIENT)?;
    self.worker.boot().await?;
    info!(
      controller = ?self.worker.clients().controller(CLI_CLIENT)?,
      "Watching for updates"
    );

    let checker = UpdateChecker::new(Arc::clone(&self.fetcher), url, self.config.update_interval());
    // First tick fires immediately
    let mut ticker = tokio::time::interval(checker.interval());
    let worker = &self.worker;
    let notices = &mut self.notices;
    // One future for the whole loop so a signal during a check is kept
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
      tokio::select! {
        _ = ticker.tick() => {
          match worker.check_for_update(&checker).await {
            Ok(Some(version)) => info!(version = %version, "Upgraded"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Update check failed"),
          }
        }
        Some(notice) = notices.next() => print_notice(&notice),
        _ = &mut interrupted => {
          info!("Interrupted; stopping");
          worker.clients().remove(CLI_CLIENT)?;
          return Ok(());
        }
      }
    }
  }
}

fn status_line(response: &Response) -> String {
  if response.is_network_error() {
    "network error".to_string()
  } else {
    format!("HTTP {}", response.status)
  }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
  let text = serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to encode JSON: {}", e))?;
  println!("{}", text);
  Ok(())
}

fn print_notice(notice: &Notice) {
  match notice {
    Notice::StateChange { version, state } => println!("{} is {}", version, state),
    Notice::UpdateFound { version } => println!("Update found: {}", version),
    Notice::ControllerChange { client_id, version } => {
      println!("{} is now controlled by {}; reload to use it", client_id, version)
    }
  }
}
