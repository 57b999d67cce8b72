use tokio::sync::mpsc;

use crate::lifecycle::WorkerState;

/// Notices emitted by the worker for the client UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
  /// A version moved through the lifecycle
  StateChange { version: String, state: WorkerState },
  /// The update check found a newer deployed version
  UpdateFound { version: String },
  /// A client is now controlled by a different version; it should reload
  ControllerChange { client_id: String, version: String },
}

/// Sending half handed to the worker
pub type NoticeSender = mpsc::UnboundedSender<Notice>;

/// Receives worker notices on the client side
pub struct NoticeHandler {
  rx: mpsc::UnboundedReceiver<Notice>,
}

impl NoticeHandler {
  /// Create the channel; the sender goes to the worker
  pub fn new() -> (NoticeSender, Self) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, Self { rx })
  }

  /// Receive the next notice
  pub async fn next(&mut self) -> Option<Notice> {
    self.rx.recv().await
  }

  /// Take every notice already queued without waiting
  pub fn drain(&mut self) -> Vec<Notice> {
    let mut notices = Vec::new();
    while let Ok(notice) = self.rx.try_recv() {
      notices.push(notice);
    }
    notices
  }
}
