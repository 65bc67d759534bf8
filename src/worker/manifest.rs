//! The pre-cache manifest: current generation name plus the fixed asset list.

use color_eyre::Result;
use serde::Deserialize;
use url::Url;

use crate::fetch::Request;

/// Generation identifier used when none is configured.
pub const DEFAULT_GENERATION: &str = "nutrient-dashboard-v1";

/// Pages pre-cached on install when no asset list is configured.
pub const DEFAULT_ASSETS: &[&str] = &[
  "/",
  "/index.html",
  "/calculator.html",
  "/symptoms.html",
  "/medications.html",
  "/tracker.html",
  "/shopping.html",
  "/bloodwork.html",
  "/protocol.html",
  "/subtraction_supplement_guide.html",
];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Manifest {
  #[serde(default = "default_generation")]
  pub generation: String,
  #[serde(default = "default_assets")]
  pub assets: Vec<String>,
}

fn default_generation() -> String {
  DEFAULT_GENERATION.to_string()
}

fn default_assets() -> Vec<String> {
  DEFAULT_ASSETS.iter().map(|s| s.to_string()).collect()
}

impl Default for Manifest {
  fn default() -> Self {
    Self {
      generation: default_generation(),
      assets: default_assets(),
    }
  }
}

impl Manifest {
  pub fn new(generation: impl Into<String>, assets: &[&str]) -> Self {
    Self {
      generation: generation.into(),
      assets: assets.iter().map(|s| s.to_string()).collect(),
    }
  }

  /// Resolve every asset path against `origin`, keeping list order.
  pub fn requests(&self, origin: &Url) -> Result<Vec<Request>> {
    self
      .assets
      .iter()
      .map(|path| Request::for_path(origin, path))
      .collect()
  }
}
