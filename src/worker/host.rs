//! Worker host: owns the lifecycle state and dispatches typed events to the
//! registered handler.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::cache::CacheResult;
use crate::fetch::{Request, Response};

use super::event::{EventOutcome, ExtendableEvent, KeepAlive, LifecycleEvent, WorkerSignals};

/// Handler registered against the host, one method per event type.
///
/// The host awaits the returned future before it considers the event
/// finished. Work that must outlive the handler goes through
/// `ExtendableEvent::wait_until`.
#[async_trait]
pub trait LifecycleHandler: Send + Sync + 'static {
  async fn install(&self, event: &ExtendableEvent) -> Result<()>;

  async fn activate(&self, event: &ExtendableEvent) -> Result<()>;

  async fn fetch(&self, event: &ExtendableEvent, request: Request) -> Result<CacheResult<Response>>;
}

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Parsed,
  Installing,
  Installed,
  Activating,
  Activated,
  /// Install failed; this worker will never activate
  Redundant,
}

/// Hosts one lifecycle handler.
///
/// Fetch events are accepted in every state, including while install or
/// activate are still running.
pub struct ServiceWorker<H: LifecycleHandler> {
  handler: H,
  state: Mutex<WorkerState>,
  keep_alive: KeepAlive,
  signals: Arc<WorkerSignals>,
}

impl<H: LifecycleHandler> ServiceWorker<H> {
  pub fn new(handler: H) -> Self {
    Self {
      handler,
      state: Mutex::new(WorkerState::Parsed),
      keep_alive: KeepAlive::new(),
      signals: Arc::default(),
    }
  }

  pub fn handler(&self) -> &H {
    &self.handler
  }

  pub fn state(&self) -> WorkerState {
    match self.state.lock() {
      Ok(state) => *state,
      Err(poisoned) => *poisoned.into_inner(),
    }
  }

  pub fn skip_waiting_requested(&self) -> bool {
    self.signals.skip_waiting_requested()
  }

  pub fn clients_claimed(&self) -> bool {
    self.signals.clients_claimed()
  }

  /// Number of keep-alive tokens still outstanding.
  pub fn pending_work(&self) -> usize {
    self.keep_alive.pending()
  }

  /// Resolve once all extended work (background revalidation included) has
  /// finished. Hosts must not shut down before this.
  pub async fn idle(&self) {
    self.keep_alive.settled().await
  }

  fn event(&self) -> ExtendableEvent {
    ExtendableEvent::new(self.keep_alive.clone(), Arc::clone(&self.signals))
  }

  /// Move from `from` to `to`, failing if the worker is elsewhere.
  fn transition(&self, from: WorkerState, to: WorkerState) -> Result<()> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    if *state != from {
      return Err(eyre!("Cannot move worker to {:?} from {:?}", to, *state));
    }
    *state = to;
    Ok(())
  }

  fn set_state(&self, to: WorkerState) -> Result<()> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *state = to;
    Ok(())
  }

  /// Deliver the install event. On failure the worker becomes redundant.
  pub async fn install(&self) -> Result<()> {
    self.transition(WorkerState::Parsed, WorkerState::Installing)?;

    let event = self.event();
    let _window = event.keep_alive();
    match self.handler.install(&event).await {
      Ok(()) => {
        self.set_state(WorkerState::Installed)?;
        info!("Worker installed");
        Ok(())
      }
      Err(e) => {
        self.set_state(WorkerState::Redundant)?;
        warn!(error = %e, "Worker install failed");
        Err(e)
      }
    }
  }

  /// Deliver the activate event. Only an installed worker can activate.
  ///
  /// A failing handler still leaves the worker activated; the error is
  /// returned for the host to report.
  pub async fn activate(&self) -> Result<()> {
    self.transition(WorkerState::Installed, WorkerState::Activating)?;

    let event = self.event();
    let _window = event.keep_alive();
    let result = self.handler.activate(&event).await;
    self.set_state(WorkerState::Activated)?;

    match &result {
      Ok(()) => info!("Worker activated"),
      Err(e) => warn!(error = %e, "Activate handler failed"),
    }
    result
  }

  /// Deliver a fetch event.
  pub async fn fetch(&self, request: Request) -> Result<CacheResult<Response>> {
    let event = self.event();
    let _window = event.keep_alive();
    self.handler.fetch(&event, request).await
  }

  /// Deliver any lifecycle event and wrap its result.
  pub async fn dispatch(&self, event: LifecycleEvent) -> Result<EventOutcome> {
    match event {
      LifecycleEvent::Install => self.install().await.map(|()| EventOutcome::Installed),
      LifecycleEvent::Activate => self.activate().await.map(|()| EventOutcome::Activated),
      LifecycleEvent::Fetch(request) => self.fetch(request).await.map(EventOutcome::Responded),
    }
  }
}
