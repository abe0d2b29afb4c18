use crate::dispatch::ABI_VERSION;
use crate::error::BridgeError;
use crate::memory::MAX_PAGES;
use serde::{Deserialize, Serialize};

/// Instantiation settings for a [`Bridge`](crate::Bridge).
///
/// Deserializes from JSON with every field optional:
///
/// ```
/// let options = glue_js::BridgeOptions::from_json(r#"{ "max_pages": 64 }"#).unwrap();
/// assert_eq!(options.max_pages, 64);
/// assert_eq!(options.initial_pages, 17);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeOptions {
  /// Pages (64 KiB each) the memory starts with.
  pub initial_pages: u32,
  pub max_pages: u32,
  /// Largest string, in bytes, moved across the boundary in one piece.
  pub max_string_bytes: usize,
  /// ABI version the guest was built against. Must match the host's.
  pub abi_version: u32,
  /// Initial slot capacity of the handle table.
  pub heap_capacity: usize,
}

impl Default for BridgeOptions {
  fn default() -> Self {
    Self {
      initial_pages: 17,
      max_pages: 16384,
      max_string_bytes: 1 << 24,
      abi_version: ABI_VERSION,
      heap_capacity: 128,
    }
  }
}

impl BridgeOptions {
  pub fn from_json(json: &str) -> Result<Self, BridgeError> {
    let options: Self =
      serde_json::from_str(json).map_err(|err| BridgeError::InvalidOptions(err.to_string()))?;
    options.validate()?;
    Ok(options)
  }

  pub fn validate(&self) -> Result<(), BridgeError> {
    if self.max_pages > MAX_PAGES {
      return Err(BridgeError::InvalidOptions(format!(
        "max_pages {} exceeds {MAX_PAGES}",
        self.max_pages
      )));
    }
    if self.initial_pages > self.max_pages {
      return Err(BridgeError::InvalidOptions(format!(
        "initial_pages {} exceeds max_pages {}",
        self.initial_pages, self.max_pages
      )));
    }
    if self.max_string_bytes == 0 {
      return Err(BridgeError::InvalidOptions(
        "max_string_bytes must be positive".to_string(),
      ));
    }
    Ok(())
  }
}
