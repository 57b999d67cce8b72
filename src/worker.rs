//! The offline worker: lifecycle events in, responses and notices out.

use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use url::Url;

use crate::cache::{BlobCache, Generations};
use crate::event::{Notice, NoticeSender};
use crate::lifecycle::{Activation, Clients, Lifecycle, UpdateChecker, WorkerState};
use crate::net::{Fetcher, Request, Response};
use crate::store::{LocalStore, RecordBackend};
use crate::strategy::{Dispatcher, Engine, StrategyKind};

/// Resolved settings for one deployment.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
  pub api_origin: Url,
  pub warm_set: Vec<Url>,
  pub offline_page: Url,
  pub cache_prefix: Option<String>,
  pub version: String,
}

/// Events delivered to the worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
  Install,
  Activate,
  Fetch(Request),
}

#[derive(Debug)]
pub enum WorkerOutcome {
  Installed { version: String, cached: usize },
  Activated { version: String, activation: Activation },
  Responded(Response),
}

pub struct ServiceWorker<C: BlobCache, B: RecordBackend, F: Fetcher> {
  caches: Arc<C>,
  store: LocalStore<B>,
  fetcher: Arc<F>,
  settings: WorkerSettings,
  dispatcher: Dispatcher,
  clients: Clients,
  notices: NoticeSender,
  /// Newest known version
  lifecycle: Mutex<Lifecycle<C, F>>,
  /// Engine of the activated version; requests bypass caching until one exists
  engine: RwLock<Option<Arc<Engine<C, B, F>>>>,
}

impl<C: BlobCache, B: RecordBackend, F: Fetcher> ServiceWorker<C, B, F> {
  pub fn new(
    caches: Arc<C>,
    store: LocalStore<B>,
    fetcher: Arc<F>,
    settings: WorkerSettings,
    notices: NoticeSender,
  ) -> Self {
    let dispatcher = Dispatcher::new(&settings.api_origin);
    let lifecycle = Lifecycle::new(
      Arc::clone(&caches),
      Arc::clone(&fetcher),
      Generations::new(settings.cache_prefix.as_deref(), &settings.version),
      settings.warm_set.clone(),
      notices.clone(),
    );

    Self {
      caches,
      store,
      fetcher,
      settings,
      dispatcher,
      clients: Clients::new(notices.clone()),
      notices,
      lifecycle: Mutex::new(lifecycle),
      engine: RwLock::new(None),
    }
  }

  pub fn caches(&self) -> &C {
    &self.caches
  }

  pub fn store(&self) -> &LocalStore<B> {
    &self.store
  }

  pub fn clients(&self) -> &Clients {
    &self.clients
  }

  pub fn classify(&self, request: &Request) -> StrategyKind {
    self.dispatcher.classify(request)
  }

  pub async fn version(&self) -> String {
    self.lifecycle.lock().await.version().to_string()
  }

  pub async fn state(&self) -> WorkerState {
    self.lifecycle.lock().await.state()
  }

  pub async fn handle(&self, event: WorkerEvent) -> Result<WorkerOutcome> {
    match event {
      WorkerEvent::Install => self.on_install().await,
      WorkerEvent::Activate => self.on_activate().await,
      WorkerEvent::Fetch(request) => Ok(WorkerOutcome::Responded(self.on_fetch(&request).await)),
    }
  }

  async fn on_install(&self) -> Result<WorkerOutcome> {
    let mut lifecycle = self.lifecycle.lock().await;
    let cached = lifecycle.install().await?;
    Ok(WorkerOutcome::Installed {
      version: lifecycle.version().to_string(),
      cached,
    })
  }

  async fn on_activate(&self) -> Result<WorkerOutcome> {
    let mut lifecycle = self.lifecycle.lock().await;
    let activation = lifecycle.activate(&self.clients)?;
    self.serve(lifecycle.generations().clone()).await;
    Ok(WorkerOutcome::Activated {
      version: lifecycle.version().to_string(),
      activation,
    })
  }

  async fn on_fetch(&self, request: &Request) -> Response {
    let engine = self.engine.read().await.clone();
    match engine {
      Some(engine) => engine.handle(request).await,
      None => self.passthrough(request).await,
    }
  }

  async fn passthrough(&self, request: &Request) -> Response {
    match self.fetcher.fetch(request).await {
      Ok(response) => response,
      Err(e) => {
        warn!(url = %request.url, error = %e, "Fetch failed with no active version");
        Response::network_error()
      }
    }
  }

  async fn serve(&self, generations: Generations) {
    let engine = Engine::new(
      Arc::clone(&self.caches),
      self.store.clone(),
      Arc::clone(&self.fetcher),
      generations,
      self.dispatcher.clone(),
      self.settings.offline_page.clone(),
    );
    *self.engine.write().await = Some(Arc::new(engine));
  }

  /// Bring the configured version into service.
  ///
  /// A version installed by an earlier run is resumed without refetching its
  /// warm set, still evicting stale generations; otherwise it goes through
  /// install and activate.
  pub async fn boot(&self) -> Result<()> {
    let restored = {
      let mut lifecycle = self.lifecycle.lock().await;
      if lifecycle.state() != WorkerState::Parsed {
        return Ok(());
      }
      if lifecycle.is_provisioned()? {
        let activation = lifecycle.restore(&self.clients)?;
        info!(
          version = lifecycle.version(),
          evicted = activation.evicted.len(),
          "Resumed installed version"
        );
        Some(lifecycle.generations().clone())
      } else {
        None
      }
    };

    match restored {
      Some(generations) => self.serve(generations).await,
      None => {
        self.handle(WorkerEvent::Install).await?;
        self.handle(WorkerEvent::Activate).await?;
      }
    }
    Ok(())
  }

  /// Install and activate `version`, replacing the current one.
  ///
  /// If the install fails the current version keeps serving.
  pub async fn upgrade(&self, version: &str) -> Result<Activation> {
    let mut current = self.lifecycle.lock().await;
    if current.version() == version {
      return Ok(Activation::default());
    }

    info!(from = current.version(), to = version, "Update found");
    let _ = self.notices.send(Notice::UpdateFound {
      version: version.to_string(),
    });

    let mut next = Lifecycle::new(
      Arc::clone(&self.caches),
      Arc::clone(&self.fetcher),
      Generations::new(self.settings.cache_prefix.as_deref(), version),
      self.settings.warm_set.clone(),
      self.notices.clone(),
    );
    next.install().await?;
    let activation = next.activate(&self.clients)?;
    self.serve(next.generations().clone()).await;

    current.supersede();
    *current = next;
    Ok(activation)
  }

  /// Ask the deployment for its version and upgrade when it moved.
  pub async fn check_for_update(&self, checker: &UpdateChecker<F>) -> Result<Option<String>> {
    let current = self.version().await;
    match checker.check(&current).await? {
      Some(version) => {
        self.upgrade(&version).await?;
        Ok(Some(version))
      }
      None => Ok(None),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteBlobCache;
  use crate::event::NoticeHandler;
  use crate::net::fake::ScriptedFetcher;
  use crate::net::ResponseSource;
  use crate::store::{Collection, SqliteRecords};
  use std::time::Duration;

  const APP: &str = "http://localhost:5173";
  const API: &str = "http://localhost:5000";

  type TestWorker = ServiceWorker<SqliteBlobCache, SqliteRecords, ScriptedFetcher>;

  fn url(base: &str, path: &str) -> Url {
    Url::parse(base).unwrap().join(path).unwrap()
  }

  fn settings(version: &str) -> WorkerSettings {
    WorkerSettings {
      api_origin: Url::parse(API).unwrap(),
      warm_set: vec![url(APP, "/"), url(APP, "/offline.html")],
      offline_page: url(APP, "/offline.html"),
      cache_prefix: None,
      version: version.to_string(),
    }
  }

  fn deployment() -> ScriptedFetcher {
    ScriptedFetcher::new()
      .route(&format!("{}/", APP), Response::new(200, b"<html>home</html>".to_vec()))
      .route(
        &format!("{}/offline.html", APP),
        Response::new(200, b"<html>offline</html>".to_vec()),
      )
      .route(
        &format!("{}/doctors", API),
        Response::new(200, br#"[{"id":1,"name":"Dr. Ada","specialty":"Cardiology"}]"#.to_vec()),
      )
  }

  fn worker(caches: Arc<SqliteBlobCache>, fetcher: Arc<ScriptedFetcher>) -> (TestWorker, NoticeHandler) {
    worker_at(caches, fetcher, "v2")
  }

  fn worker_at(
    caches: Arc<SqliteBlobCache>,
    fetcher: Arc<ScriptedFetcher>,
    version: &str,
  ) -> (TestWorker, NoticeHandler) {
    let (tx, notices) = NoticeHandler::new();
    let store = LocalStore::new(SqliteRecords::open_in_memory().unwrap());
    (ServiceWorker::new(caches, store, fetcher, settings(version), tx), notices)
  }

  async fn fetch(worker: &TestWorker, request: Request) -> Response {
    match worker.handle(WorkerEvent::Fetch(request)).await.unwrap() {
      WorkerOutcome::Responded(response) => response,
      other => panic!("unexpected outcome {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_boot_installs_and_serves_offline() {
    let caches = Arc::new(SqliteBlobCache::open_in_memory().unwrap());
    let fetcher = Arc::new(deployment());
    let (worker, _notices) = worker(Arc::clone(&caches), Arc::clone(&fetcher));

    worker.boot().await.unwrap();
    assert_eq!(worker.state().await, WorkerState::Activated);
    assert_eq!(caches.len("static-v2").unwrap(), 2);

    let doctors = Request::get(url(API, "/doctors"));
    assert_eq!(fetch(&worker, doctors.clone()).await.status, 200);

    fetcher.set_offline(true);
    let cached = fetch(&worker, doctors).await;
    assert_eq!(cached.source, ResponseSource::Cache);

    let page = Request::get(url(APP, "/appointments/new")).with_header("accept", "text/html");
    assert_eq!(fetch(&worker, page).await.body, b"<html>offline</html>");
    assert_eq!(worker.store().get_all(Collection::Doctors).len(), 1);
  }

  #[tokio::test]
  async fn test_fetch_before_activation_goes_to_network() {
    let caches = Arc::new(SqliteBlobCache::open_in_memory().unwrap());
    let fetcher = Arc::new(deployment());
    let (worker, _notices) = worker(Arc::clone(&caches), Arc::clone(&fetcher));

    let response = fetch(&worker, Request::get(url(API, "/doctors"))).await;
    assert_eq!(response.status, 200);
    assert!(!caches.has("data-v2").unwrap());

    fetcher.set_offline(true);
    assert!(fetch(&worker, Request::get(url(API, "/doctors"))).await.is_network_error());
  }

  #[tokio::test]
  async fn test_boot_resumes_installed_version() {
    let caches = Arc::new(SqliteBlobCache::open_in_memory().unwrap());
    let fetcher = Arc::new(deployment());
    let (first, _notices) = worker(Arc::clone(&caches), Arc::clone(&fetcher));
    first.boot().await.unwrap();
    let calls = fetcher.calls();

    fetcher.set_offline(true);
    let (second, _notices) = worker(Arc::clone(&caches), Arc::clone(&fetcher));
    second.boot().await.unwrap();

    assert_eq!(second.state().await, WorkerState::Activated);
    assert_eq!(fetcher.calls(), calls);
  }

  #[tokio::test]
  async fn test_resume_after_bare_install_evicts_previous_version() {
    let caches = Arc::new(SqliteBlobCache::open_in_memory().unwrap());
    let manifest = format!("{}/manifest.json", APP);
    let fetcher = Arc::new(deployment().route(&manifest, Response::new(200, b"old-v2".to_vec())));

    let (v2, _notices) = worker(Arc::clone(&caches), Arc::clone(&fetcher));
    v2.boot().await.unwrap();
    fetch(&v2, Request::get(Url::parse(&manifest).unwrap())).await;
    assert!(caches.has("dynamic-v2").unwrap());

    // A run that stops after install leaves v3 provisioned but not activated
    let (installer, _notices) = worker_at(Arc::clone(&caches), Arc::clone(&fetcher), "v3");
    installer.handle(WorkerEvent::Install).await.unwrap();

    fetcher.set_offline(true);
    let (v3, _notices) = worker_at(Arc::clone(&caches), Arc::clone(&fetcher), "v3");
    v3.boot().await.unwrap();

    assert_eq!(v3.state().await, WorkerState::Activated);
    assert_eq!(caches.keys().unwrap(), vec!["static-v3"]);
    let response = fetch(&v3, Request::get(Url::parse(&manifest).unwrap())).await;
    assert_ne!(response.body, b"old-v2");
    assert_eq!(response.status, 408);
  }

  #[tokio::test]
  async fn test_explicit_events_run_in_order() {
    let caches = Arc::new(SqliteBlobCache::open_in_memory().unwrap());
    let (worker, _notices) = worker(caches, Arc::new(deployment()));

    assert!(worker.handle(WorkerEvent::Activate).await.is_err());
    match worker.handle(WorkerEvent::Install).await.unwrap() {
      WorkerOutcome::Installed { version, cached } => {
        assert_eq!(version, "v2");
        assert_eq!(cached, 2);
      }
      other => panic!("unexpected outcome {:?}", other),
    }
    assert!(matches!(
      worker.handle(WorkerEvent::Activate).await.unwrap(),
      WorkerOutcome::Activated { .. }
    ));
  }

  #[tokio::test]
  async fn test_upgrade_evicts_previous_generations() {
    let caches = Arc::new(SqliteBlobCache::open_in_memory().unwrap());
    let fetcher = Arc::new(deployment());
    let (worker, mut notices) = worker(Arc::clone(&caches), Arc::clone(&fetcher));
    worker.clients().add("tab-1").unwrap();
    worker.boot().await.unwrap();
    fetch(&worker, Request::get(url(API, "/doctors"))).await;
    notices.drain();

    let activation = worker.upgrade("v3").await.unwrap();

    assert_eq!(activation.evicted, vec!["static-v2", "data-v2"]);
    assert_eq!(activation.claimed, vec!["tab-1"]);
    assert_eq!(caches.keys().unwrap(), vec!["static-v3"]);
    assert_eq!(worker.version().await, "v3");

    let notices = notices.drain();
    assert!(notices.contains(&Notice::UpdateFound { version: "v3".into() }));
    assert!(notices.contains(&Notice::StateChange {
      version: "v2".into(),
      state: WorkerState::Redundant
    }));
    assert!(notices.contains(&Notice::ControllerChange {
      client_id: "tab-1".into(),
      version: "v3".into()
    }));

    // New writes land in the new generations
    fetch(&worker, Request::get(url(API, "/doctors"))).await;
    assert!(caches.has("data-v3").unwrap());
  }

  #[tokio::test]
  async fn test_failed_upgrade_keeps_current_version() {
    let caches = Arc::new(SqliteBlobCache::open_in_memory().unwrap());
    let fetcher = Arc::new(deployment());
    let (worker, _notices) = worker(Arc::clone(&caches), Arc::clone(&fetcher));
    worker.boot().await.unwrap();

    fetcher.set_offline(true);
    assert!(worker.upgrade("v3").await.is_err());
    assert_eq!(worker.version().await, "v2");
    assert!(caches.has("static-v2").unwrap());
    assert!(!caches.has("static-v3").unwrap());
  }

  #[tokio::test]
  async fn test_check_for_update_upgrades() {
    let caches = Arc::new(SqliteBlobCache::open_in_memory().unwrap());
    let version_url = format!("{}/version.json", APP);
    let fetcher = Arc::new(
      deployment().route(&version_url, Response::new(200, br#"{"version":"v3"}"#.to_vec())),
    );
    let (worker, _notices) = worker(Arc::clone(&caches), Arc::clone(&fetcher));
    worker.boot().await.unwrap();

    let checker = UpdateChecker::new(
      Arc::clone(&fetcher),
      Url::parse(&version_url).unwrap(),
      Duration::from_secs(3600),
    );
    assert_eq!(worker.check_for_update(&checker).await.unwrap().as_deref(), Some("v3"));
    assert_eq!(worker.check_for_update(&checker).await.unwrap(), None);
    assert_eq!(caches.keys().unwrap(), vec!["static-v3"]);
  }

  #[test]
  fn test_classify_uses_api_origin() {
    let caches = Arc::new(SqliteBlobCache::open_in_memory().unwrap());
    let (worker, _notices) = worker(caches, Arc::new(deployment()));
    assert_eq!(
      worker.classify(&Request::get(url(API, "/patients"))),
      StrategyKind::NetworkFirstWithStore
    );
    assert_eq!(
      worker.classify(&Request::get(url(APP, "/logo.svg"))),
      StrategyKind::CacheFirst
    );
  }
}
