//! In-process registry of the pages a cache controller can notify.
//!
//! Stands in for the platform's client list: pages connect, an activating
//! controller claims them, and update notices fan out over channels to the
//! clients that asked for them.

use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use url::Url;

/// What kind of page a client is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
  /// A regular page; receives no update notices.
  Page,
  /// The update-status page; receives `UpdateAvailable` notices.
  StatusPage,
}

/// Messages posted to connected clients.
///
/// Serializes to the wire shape consumers expect, e.g.
/// `{"type":"UPDATE_AVAILABLE","url":"https://…"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  UpdateAvailable { url: String },
}

struct Client {
  id: u64,
  kind: ClientKind,
  controlled: bool,
  tx: mpsc::UnboundedSender<ClientMessage>,
}

#[derive(Default)]
struct RegistryState {
  next_id: u64,
  clients: Vec<Client>,
}

/// Shared registry of connected clients.
#[derive(Clone, Default)]
pub struct ClientRegistry {
  inner: Arc<Mutex<RegistryState>>,
}

/// A connected client's end: its id and message receiver.
pub struct ClientHandle {
  pub id: u64,
  rx: mpsc::UnboundedReceiver<ClientMessage>,
}

impl ClientHandle {
  /// Receive the next message.
  pub async fn next(&mut self) -> Option<ClientMessage> {
    self.rx.recv().await
  }

  /// Receive a message if one is already queued.
  #[allow(dead_code)]
  pub fn try_next(&mut self) -> Option<ClientMessage> {
    self.rx.try_recv().ok()
  }
}

impl ClientRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
    // Client bookkeeping stays usable even if a holder panicked.
    self.inner.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Register a new client and return its handle.
  pub fn connect(&self, kind: ClientKind) -> ClientHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut state = self.lock();
    state.next_id += 1;
    let id = state.next_id;
    state.clients.push(Client {
      id,
      kind,
      controlled: false,
      tx,
    });
    ClientHandle { id, rx }
  }

  /// Take control of every connected client immediately (claim semantics).
  pub fn claim_all(&self) {
    for client in &mut self.lock().clients {
      client.controlled = true;
    }
  }

  /// How many connected clients are currently controlled.
  pub fn controlled_count(&self) -> usize {
    self.lock().clients.iter().filter(|c| c.controlled).count()
  }

  /// Post an update notice to every status page.
  ///
  /// Disconnected clients are pruned as a side effect. Returns how many
  /// clients were notified.
  pub fn broadcast_update(&self, url: &Url) -> usize {
    let mut state = self.lock();
    let mut notified = 0;
    state.clients.retain(|client| {
      if client.kind != ClientKind::StatusPage {
        return true;
      }
      let message = ClientMessage::UpdateAvailable {
        url: url.to_string(),
      };
      match client.tx.send(message) {
        Ok(()) => {
          notified += 1;
          true
        }
        Err(_) => {
          tracing::debug!(client = client.id, "dropping disconnected client");
          false
        }
      }
    });
    notified
  }
}
