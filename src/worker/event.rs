//! Lifecycle events and the keep-alive window that spans their work.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::cache::CacheResult;
use crate::fetch::{Request, Response};

/// Events delivered by the host to the lifecycle handler
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
  /// Pre-cache the asset list into the current generation
  Install,
  /// Purge every generation except the current one
  Activate,
  /// Answer a request
  Fetch(Request),
}

/// Typed result of a dispatched event
#[derive(Debug)]
pub enum EventOutcome {
  Installed,
  Activated,
  Responded(CacheResult<Response>),
}

/// Counts outstanding work that must finish before the host may stop.
#[derive(Clone, Default)]
pub struct KeepAlive {
  inner: Arc<KeepAliveInner>,
}

#[derive(Default)]
struct KeepAliveInner {
  pending: AtomicUsize,
  notify: Notify,
}

impl KeepAlive {
  pub fn new() -> Self {
    Self::default()
  }

  /// Open the window until the returned token is dropped.
  pub fn token(&self) -> KeepAliveToken {
    self.inner.pending.fetch_add(1, Ordering::SeqCst);
    KeepAliveToken {
      inner: Arc::clone(&self.inner),
    }
  }

  pub fn pending(&self) -> usize {
    self.inner.pending.load(Ordering::SeqCst)
  }

  /// Resolve once no tokens are alive.
  pub async fn settled(&self) {
    loop {
      // Register before checking so a drop in between is not missed
      let notified = self.inner.notify.notified();
      if self.pending() == 0 {
        return;
      }
      notified.await;
    }
  }
}

/// Deferred-completion token. The keep-alive window stays open while any
/// token exists.
pub struct KeepAliveToken {
  inner: Arc<KeepAliveInner>,
}

impl Drop for KeepAliveToken {
  fn drop(&mut self) {
    if self.inner.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
      self.inner.notify.notify_waiters();
    }
  }
}

/// Signals a handler can raise toward the host.
#[derive(Debug, Default)]
pub struct WorkerSignals {
  skip_waiting: AtomicBool,
  clients_claimed: AtomicBool,
}

impl WorkerSignals {
  pub fn skip_waiting_requested(&self) -> bool {
    self.skip_waiting.load(Ordering::SeqCst)
  }

  pub fn clients_claimed(&self) -> bool {
    self.clients_claimed.load(Ordering::SeqCst)
  }
}

/// Context handed to every handler invocation.
#[derive(Clone)]
pub struct ExtendableEvent {
  keep_alive: KeepAlive,
  signals: Arc<WorkerSignals>,
}

impl ExtendableEvent {
  pub fn new(keep_alive: KeepAlive, signals: Arc<WorkerSignals>) -> Self {
    Self {
      keep_alive,
      signals,
    }
  }

  /// Hold the host's keep-alive window open until the token is dropped.
  pub fn keep_alive(&self) -> KeepAliveToken {
    self.keep_alive.token()
  }

  /// Run `work` detached from the handler while keeping the host alive
  /// until it finishes.
  pub fn wait_until<F>(&self, work: F) -> JoinHandle<()>
  where
    F: Future<Output = ()> + Send + 'static,
  {
    let token = self.keep_alive();
    tokio::spawn(async move {
      work.await;
      drop(token);
    })
  }

  /// Ask to replace a waiting worker without waiting for clients to close.
  pub fn skip_waiting(&self) {
    self.signals.skip_waiting.store(true, Ordering::SeqCst);
  }

  /// Take control of every open client immediately.
  pub fn claim_clients(&self) {
    self.signals.clients_claimed.store(true, Ordering::SeqCst);
  }
}
