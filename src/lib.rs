//! Offline cache manager for static multi-page sites.
//!
//! Pre-caches a fixed asset list on install, purges stale generations on
//! activate, and serves requests cache-first with background revalidation.

pub mod cache;
pub mod config;
pub mod fetch;
pub mod worker;

#[cfg(test)]
mod testing;
