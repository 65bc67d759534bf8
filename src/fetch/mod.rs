//! Network side of the cache: request/response values and the fetcher.

mod client;
mod types;

pub use client::{Fetcher, HttpFetcher};
pub use types::{Method, Request, Response, ResponseType};
