//! Cache lifecycle: the caching policy and the host that drives it.
//!
//! - `CacheController` implements install / activate / fetch
//! - `ServiceWorker` dispatches typed lifecycle events to a handler and keeps
//!   the host alive until extended work settles
//! - `Manifest` names the current generation and the pre-cached assets

mod controller;
mod event;
mod hook;
mod host;
mod manifest;

pub use controller::CacheController;
pub use event::{EventOutcome, ExtendableEvent, KeepAlive, KeepAliveToken, LifecycleEvent, WorkerSignals};
pub use hook::{log_revalidation, RevalidationHook, RevalidationOutcome};
pub use host::{LifecycleHandler, ServiceWorker, WorkerState};
pub use manifest::{Manifest, DEFAULT_ASSETS, DEFAULT_GENERATION};
