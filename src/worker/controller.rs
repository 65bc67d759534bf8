//! Cache lifecycle controller: pre-cache on install, purge on activate,
//! cache-first with background revalidation on fetch.

use async_trait::async_trait;
use color_eyre::eyre::WrapErr;
use color_eyre::{eyre::eyre, Result};
use futures::future::{join_all, try_join_all};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{Cache, CacheResult, CacheStorage};
use crate::fetch::{Fetcher, Request, Response, ResponseType};

use super::event::ExtendableEvent;
use super::hook::{log_revalidation, RevalidationHook, RevalidationOutcome};
use super::host::LifecycleHandler;
use super::manifest::Manifest;

/// Applies the caching policy for one site.
///
/// The controller holds no cache handle of its own: every event opens the
/// current generation, uses it, and drops it.
pub struct CacheController<S: CacheStorage, F: Fetcher> {
  storage: Arc<S>,
  fetcher: Arc<F>,
  generation: String,
  assets: Vec<Request>,
  hook: RevalidationHook,
}

impl<S: CacheStorage, F: Fetcher> CacheController<S, F> {
  /// Create a controller for `origin`. Asset paths are resolved once here.
  pub fn new(storage: Arc<S>, fetcher: Arc<F>, origin: &Url, manifest: &Manifest) -> Result<Self> {
    if manifest.generation.is_empty() {
      return Err(eyre!("Generation name must not be empty"));
    }

    Ok(Self {
      storage,
      fetcher,
      generation: manifest.generation.clone(),
      assets: manifest.requests(origin)?,
      hook: log_revalidation(),
    })
  }

  /// Replace the revalidation hook.
  pub fn with_hook(mut self, hook: RevalidationHook) -> Self {
    self.hook = hook;
    self
  }

  pub fn generation(&self) -> &str {
    &self.generation
  }

  pub fn assets(&self) -> &[Request] {
    &self.assets
  }

  /// Fetch every asset and insert them in one bulk write.
  ///
  /// Any failed fetch or non-OK status aborts before anything is written.
  pub async fn precache(&self) -> Result<()> {
    let cache = self.storage.open(&self.generation)?;
    info!(
      generation = %self.generation,
      assets = self.assets.len(),
      "Pre-caching assets"
    );

    let fetcher = self.fetcher.as_ref();
    let fetches = self.assets.iter().map(|request| async move {
      let response = fetcher.fetch(request).await?;
      if !response.ok() {
        return Err(eyre!(
          "Asset {} returned status {}",
          request.url,
          response.status
        ));
      }
      Ok::<_, color_eyre::Report>((request.clone(), response))
    });

    let entries = try_join_all(fetches)
      .await
      .wrap_err_with(|| format!("Install of generation {} failed", self.generation))?;

    cache
      .put_all(&entries)
      .wrap_err_with(|| format!("Install of generation {} failed", self.generation))?;

    info!(generation = %self.generation, entries = entries.len(), "Pre-cache complete");
    Ok(())
  }

  /// Delete every generation other than the current one.
  ///
  /// Deletions run concurrently and their failures are only logged.
  pub async fn purge_stale(&self) -> Result<()> {
    let stale: Vec<String> = self
      .storage
      .keys()?
      .into_iter()
      .filter(|name| *name != self.generation)
      .collect();

    let deletions = stale.into_iter().map(|name| {
      let storage = Arc::clone(&self.storage);
      tokio::task::spawn_blocking(move || {
        let result = storage.delete(&name);
        (name, result)
      })
    });

    for joined in join_all(deletions).await {
      match joined {
        Ok((name, Ok(_))) => info!(generation = %name, "Deleted stale generation"),
        Ok((name, Err(e))) => {
          debug!(generation = %name, error = %e, "Failed to delete stale generation")
        }
        Err(e) => debug!(error = %e, "Generation deletion task failed"),
      }
    }

    Ok(())
  }

  /// Answer `request` cache-first.
  ///
  /// A hit is returned immediately and refreshed in the background under the
  /// event's keep-alive window. A miss goes to the network; same-origin 200
  /// responses are stored before being returned. Network failures on a miss
  /// are returned to the caller unchanged.
  pub async fn respond(
    &self,
    event: &ExtendableEvent,
    request: Request,
  ) -> Result<CacheResult<Response>> {
    let cache = self.storage.open(&self.generation)?;

    if let Some(hit) = cache.match_request(&request)? {
      debug!(url = %request.url, "Cache hit");
      self.revalidate(event, request);
      return Ok(CacheResult::from_cache(hit.response, hit.cached_at));
    }

    debug!(url = %request.url, "Cache miss");
    let response = self.fetcher.fetch(&request).await?;

    if response.status == 200 && response.response_type == ResponseType::Basic {
      if let Err(e) = cache.put(&request, &response) {
        warn!(url = %request.url, error = %e, "Failed to cache network response");
      }
    }

    Ok(CacheResult::from_network(response))
  }

  /// Refresh a cached entry without blocking the caller.
  fn revalidate(&self, event: &ExtendableEvent, request: Request) {
    let storage = Arc::clone(&self.storage);
    let fetcher = Arc::clone(&self.fetcher);
    let generation = self.generation.clone();
    let hook = Arc::clone(&self.hook);

    event.wait_until(async move {
      let outcome = match fetcher.fetch(&request).await {
        Ok(response) if response.status == 200 => {
          match storage
            .open(&generation)
            .and_then(|cache| cache.put(&request, &response))
          {
            Ok(()) => RevalidationOutcome::Updated,
            Err(e) => RevalidationOutcome::Failed {
              error: e.to_string(),
            },
          }
        }
        Ok(response) => RevalidationOutcome::Skipped {
          status: response.status,
        },
        Err(e) => RevalidationOutcome::Failed {
          error: e.to_string(),
        },
      };
      hook(&request, &outcome);
    });
  }
}

#[async_trait]
impl<S: CacheStorage, F: Fetcher> LifecycleHandler for CacheController<S, F> {
  async fn install(&self, event: &ExtendableEvent) -> Result<()> {
    self.precache().await?;
    event.skip_waiting();
    Ok(())
  }

  async fn activate(&self, event: &ExtendableEvent) -> Result<()> {
    self.purge_stale().await?;
    event.claim_clients();
    Ok(())
  }

  async fn fetch(&self, event: &ExtendableEvent, request: Request) -> Result<CacheResult<Response>> {
    self.respond(event, request).await
  }
}
