use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::event::{Notice, NoticeSender};

/// Open client views and the version controlling each of them.
pub struct Clients {
  controllers: Mutex<BTreeMap<String, Option<String>>>,
  notices: NoticeSender,
}

impl Clients {
  pub fn new(notices: NoticeSender) -> Self {
    Self {
      controllers: Mutex::new(BTreeMap::new()),
      notices,
    }
  }

  fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, Option<String>>>> {
    self
      .controllers
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Register a client. New clients start uncontrolled.
  pub fn add(&self, client_id: &str) -> Result<()> {
    self.lock()?.entry(client_id.to_string()).or_insert(None);
    Ok(())
  }

  pub fn remove(&self, client_id: &str) -> Result<bool> {
    Ok(self.lock()?.remove(client_id).is_some())
  }

  pub fn controller(&self, client_id: &str) -> Result<Option<String>> {
    Ok(self.lock()?.get(client_id).cloned().flatten())
  }

  /// Take control of every client for `version`.
  ///
  /// Each client whose controller actually changes gets a
  /// `ControllerChange` notice. Returns those client ids.
  pub fn claim(&self, version: &str) -> Result<Vec<String>> {
    let mut controllers = self.lock()?;
    let mut changed = Vec::new();

    for (client_id, controller) in controllers.iter_mut() {
      if controller.as_deref() == Some(version) {
        continue;
      }
      *controller = Some(version.to_string());
      changed.push(client_id.clone());

      // Nobody listening is fine
      let _ = self.notices.send(Notice::ControllerChange {
        client_id: client_id.clone(),
        version: version.to_string(),
      });
    }

    Ok(changed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::event::NoticeHandler;

  #[test]
  fn test_claim_controls_every_client() {
    let (tx, mut notices) = NoticeHandler::new();
    let clients = Clients::new(tx);
    clients.add("tab-1").unwrap();
    clients.add("tab-2").unwrap();

    let changed = clients.claim("v2").unwrap();
    assert_eq!(changed, vec!["tab-1", "tab-2"]);
    assert_eq!(clients.controller("tab-1").unwrap().as_deref(), Some("v2"));
    assert_eq!(notices.drain().len(), 2);
  }

  #[test]
  fn test_reclaim_by_same_version_is_quiet() {
    let (tx, mut notices) = NoticeHandler::new();
    let clients = Clients::new(tx);
    clients.add("tab-1").unwrap();
    clients.claim("v2").unwrap();
    notices.drain();

    assert!(clients.claim("v2").unwrap().is_empty());
    assert!(notices.drain().is_empty());

    assert_eq!(clients.claim("v3").unwrap(), vec!["tab-1"]);
    assert_eq!(
      notices.drain(),
      vec![Notice::ControllerChange {
        client_id: "tab-1".into(),
        version: "v3".into()
      }]
    );
  }

  #[test]
  fn test_add_keeps_existing_controller() {
    let (tx, _notices) = NoticeHandler::new();
    let clients = Clients::new(tx);
    clients.add("tab-1").unwrap();
    clients.claim("v2").unwrap();
    clients.add("tab-1").unwrap();
    assert_eq!(clients.controller("tab-1").unwrap().as_deref(), Some("v2"));

    assert!(clients.remove("tab-1").unwrap());
    assert!(clients.controller("tab-1").unwrap().is_none());
  }
}
