//! Observation point for background revalidation.
//!
//! Revalidation failures never reach the page that issued the request. They
//! are reported here instead so hosts and tests can see them.

use std::sync::Arc;
use tracing::debug;

use crate::fetch::Request;

/// What happened to a background refresh of a cached entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevalidationOutcome {
  /// Network returned 200 and the entry was overwritten
  Updated,
  /// Network answered with another status; entry left as is
  Skipped { status: u16 },
  /// Network or store failure; entry left as is
  Failed { error: String },
}

/// Callback invoked once per finished revalidation.
pub type RevalidationHook = Arc<dyn Fn(&Request, &RevalidationOutcome) + Send + Sync>;

/// Default hook: log through `tracing` and otherwise ignore.
pub fn log_revalidation() -> RevalidationHook {
  Arc::new(|request: &Request, outcome: &RevalidationOutcome| match outcome {
    RevalidationOutcome::Updated => debug!(url = %request.url, "Revalidated cache entry"),
    RevalidationOutcome::Skipped { status } => {
      debug!(url = %request.url, status, "Revalidation skipped")
    }
    RevalidationOutcome::Failed { error } => {
      debug!(url = %request.url, error = %error, "Revalidation failed")
    }
  })
}
