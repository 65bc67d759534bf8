//! Request and response values exchanged between the controller, the store
//! and the network.

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use sha2::{Digest, Sha256};
use url::Url;

/// HTTP method of a request. Only `GET` requests are ever cached.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Method(String);

impl Method {
  pub fn get() -> Self {
    Self("GET".to_string())
  }

  pub fn new(method: &str) -> Self {
    Self(method.trim().to_uppercase())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn is_get(&self) -> bool {
    self.0 == "GET"
  }
}

impl std::fmt::Display for Method {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

/// A request as seen by the fetch handler. URLs are always absolute.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Request {
  pub method: Method,
  pub url: Url,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self { method, url }
  }

  /// Build a GET request for `url`.
  pub fn get(url: Url) -> Self {
    Self::new(Method::get(), url)
  }

  /// Build a GET request for a site path resolved against `origin`.
  pub fn for_path(origin: &Url, path: &str) -> Result<Self> {
    let url = origin
      .join(path)
      .map_err(|e| eyre!("Invalid asset path '{}': {}", path, e))?;
    Ok(Self::get(url))
  }

  /// Request identity: method plus URL. The fragment is never sent, so it
  /// is not part of the identity.
  pub fn identity(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);
    format!("{} {}", self.method, url)
  }

  /// Stable, fixed-length key used by the store.
  pub fn cache_key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.identity().as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// Origin classification of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
  /// Same-origin response
  Basic,
  /// Cross-origin response with readable contents
  Cors,
  /// Cross-origin response whose contents are hidden
  Opaque,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "basic" => Ok(Self::Basic),
      "cors" => Ok(Self::Cors),
      "opaque" => Ok(Self::Opaque),
      other => Err(eyre!("Unknown response type '{}'", other)),
    }
  }
}

/// A fully buffered response.
///
/// The body is an immutable, reference-counted buffer. Storing a response and
/// returning it to the caller never requires re-reading the network body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub response_type: ResponseType,
  pub headers: Vec<(String, String)>,
  pub url: Option<Url>,
  pub body: Bytes,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      response_type: ResponseType::Basic,
      headers: Vec::new(),
      url: None,
      body: body.into(),
    }
  }

  pub fn with_type(mut self, response_type: ResponseType) -> Self {
    self.response_type = response_type;
    self
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn with_url(mut self, url: Url) -> Self {
    self.url = Some(url);
    self
  }

  /// Status in the 200-299 range.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Look up a header value (case-insensitive name).
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}
