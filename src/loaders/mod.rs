//! Configuration providers for the supported file formats.
//!
//! - TOML (native orc format, `/etc/orc.toml`)
//! - JSON
//!
//! Providers only turn bytes into a [`RawConfig`]; validation and defaults
//! live in [`RawConfig::resolve`] so every format behaves the same.

pub mod json;
pub mod toml;

use crate::config::{Config, RawConfig};
use crate::error::{Error, Result};
use std::path::Path;

/// Trait for configuration providers.
pub trait ConfigProvider: Send + Sync {
    /// Parse the raw configuration from file contents.
    fn parse(&self, content: &str) -> Result<RawConfig>;

    /// Check if this provider supports the given file extension.
    fn supports_extension(&self, ext: &str) -> bool;

    /// Get a description of the provider for logging purposes.
    fn name(&self) -> &'static str;

    /// Load and resolve a configuration file.
    fn load(&self, path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        self.parse(&content)
            .map_err(|e| {
                Error::Config(format!(
                    "Failed to parse {} {}: {}",
                    self.name(),
                    path.display(),
                    e
                ))
            })?
            .resolve()
    }
}

/// Registry of configuration providers.
pub struct ProviderRegistry {
    providers: Vec<Box<dyn ConfigProvider>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// Create a new registry with the default providers.
    pub fn new() -> Self {
        let mut registry = Self {
            providers: Vec::new(),
        };

        registry.register(Box::new(toml::TomlProvider));
        registry.register(Box::new(json::JsonProvider));

        registry
    }

    /// Register a new provider.
    pub fn register(&mut self, provider: Box<dyn ConfigProvider>) {
        self.providers.push(provider);
    }

    /// Find a provider that supports the given file extension.
    pub fn find_provider(&self, ext: &str) -> Option<&dyn ConfigProvider> {
        self.providers
            .iter()
            .find(|provider| provider.supports_extension(ext))
            .map(|b| b.as_ref())
    }

    /// Load a configuration file.
    ///
    /// Files without an extension are read as TOML.
    pub fn load(&self, path: &Path) -> Result<Config> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("toml");

        let provider = self.find_provider(ext).ok_or_else(|| {
            Error::Config(format!("No configuration provider for extension: {}", ext))
        })?;

        provider.load(path)
    }
}

pub use self::json::JsonProvider;
pub use self::toml::TomlProvider;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceMode;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    #[test]
    fn test_registry_picks_by_extension() {
        let registry = ProviderRegistry::new();
        assert_eq!(registry.find_provider("toml").map(|p| p.name()), Some("TOML"));
        assert_eq!(registry.find_provider("json").map(|p| p.name()), Some("JSON"));
        assert!(registry.find_provider("yaml").is_none());
    }

    #[test]
    fn test_registry_loads_toml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("orc.toml");
        std::fs::write(
            &path,
            r#"
[[services]]
name = "a"
command = "/bin/true"
mode = "oneshot"
"#,
        )
        .unwrap();

        let config = ProviderRegistry::new().load(&path).unwrap();
        assert_eq!(config.services.len(), 1);
        assert_eq!(config.services[0].mode, ServiceMode::Oneshot);
    }

    #[test]
    fn test_registry_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = ProviderRegistry::new()
            .load(&dir.path().join("missing.toml"))
            .unwrap_err();
        assert_matches!(err, Error::Config(msg) if msg.contains("Failed to read"));
    }

    #[test]
    fn test_registry_unknown_extension() {
        let err = ProviderRegistry::new()
            .load(Path::new("/etc/orc.yaml"))
            .unwrap_err();
        assert_matches!(err, Error::Config(msg) if msg.contains("yaml"));
    }
}
