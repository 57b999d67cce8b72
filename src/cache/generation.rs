//! Versioned cache generation names.

use std::fmt;

/// Logical role of a cache generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheRole {
  /// Warm set and static assets (cache-first)
  Static,
  /// Pages and other responses picked up at runtime
  Dynamic,
  /// API responses
  Data,
}

impl CacheRole {
  pub const ALL: [CacheRole; 3] = [CacheRole::Static, CacheRole::Dynamic, CacheRole::Data];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Static => "static",
      Self::Dynamic => "dynamic",
      Self::Data => "data",
    }
  }
}

impl fmt::Display for CacheRole {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// The set of generation names belonging to one deployed version.
///
/// With a prefix `hospital` and version `v2` the static generation is
/// `hospital-static-v2`; without a prefix it is `static-v2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generations {
  prefix: Option<String>,
  version: String,
}

impl Generations {
  pub fn new(prefix: Option<&str>, version: &str) -> Self {
    Self {
      prefix: prefix.filter(|p| !p.is_empty()).map(String::from),
      version: version.to_string(),
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  /// Name of the current generation for a role.
  pub fn name(&self, role: CacheRole) -> String {
    match &self.prefix {
      Some(prefix) => format!("{}-{}-{}", prefix, role, self.version),
      None => format!("{}-{}", role, self.version),
    }
  }

  /// All names that survive activation.
  pub fn allowed(&self) -> Vec<String> {
    CacheRole::ALL.iter().map(|role| self.name(*role)).collect()
  }

  pub fn is_current(&self, name: &str) -> bool {
    self.allowed().iter().any(|allowed| allowed == name)
  }

  /// Existing names that are garbage once this version activates.
  pub fn stale<'a>(&self, existing: &'a [String]) -> Vec<&'a str> {
    existing
      .iter()
      .map(String::as_str)
      .filter(|name| !self.is_current(name))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_names_without_prefix() {
    let generations = Generations::new(None, "v3");
    assert_eq!(
      generations.allowed(),
      vec!["static-v3", "dynamic-v3", "data-v3"]
    );
  }

  #[test]
  fn test_names_with_prefix() {
    let generations = Generations::new(Some("hospital"), "v2");
    assert_eq!(generations.name(CacheRole::Data), "hospital-data-v2");
  }

  #[test]
  fn test_empty_prefix_is_ignored() {
    assert_eq!(
      Generations::new(Some(""), "v1").name(CacheRole::Static),
      "static-v1"
    );
  }

  #[test]
  fn test_stale_keeps_only_current_version() {
    let generations = Generations::new(None, "v3");
    let existing: Vec<String> = [
      "static-v2",
      "dynamic-v2",
      "data-v2",
      "static-v3",
      "dynamic-v3",
      "data-v3",
      "hospital-app-v2",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    assert_eq!(
      generations.stale(&existing),
      vec!["static-v2", "dynamic-v2", "data-v2", "hospital-app-v2"]
    );
  }
}
