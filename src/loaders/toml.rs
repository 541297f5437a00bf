//! TOML configuration provider.
//!
//! This is the native configuration format for orc.

use crate::config::RawConfig;
use crate::error::Result;

/// Provider for TOML configuration files.
pub struct TomlProvider;

impl super::ConfigProvider for TomlProvider {
    fn parse(&self, content: &str) -> Result<RawConfig> {
        Ok(toml::from_str(content)?)
    }

    fn supports_extension(&self, ext: &str) -> bool {
        ext == "toml"
    }

    fn name(&self) -> &'static str {
        "TOML"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceMode;
    use crate::loaders::ConfigProvider;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_parse_full_document() {
        let content = r#"
[system]
shell = "/bin/ash"
stop_timeout = 5

[[services]]
name = "a"
command = "/bin/true"
mode = "oneshot"

[[services]]
name = "b"
command = "/bin/sleep 100"
log_file = "/var/log/b.log"
restart_on_failure = false
"#;

        let config = TomlProvider.parse(content).unwrap().resolve().unwrap();

        assert_eq!(config.system.shell, PathBuf::from("/bin/ash"));
        assert_eq!(config.system.stop_timeout, Duration::from_secs(5));
        assert_eq!(config.system.restart_delay, Duration::from_secs(1));

        let names: Vec<&str> = config.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);

        let a = &config.services[0];
        assert_eq!(a.mode, ServiceMode::Oneshot);
        assert!(a.restart_on_failure);

        let b = &config.services[1];
        assert_eq!(b.mode, ServiceMode::Continuous);
        assert_eq!(b.command, "/bin/sleep 100");
        assert_eq!(b.log_file, Some(PathBuf::from("/var/log/b.log")));
        assert!(!b.restart_on_failure);
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let content = r#"
[[services]]
name = "a"
command = "/bin/true"
mode = "forking"
"#;
        assert!(TomlProvider.parse(content).is_err());
    }

    #[test]
    fn test_empty_document() {
        let config = TomlProvider.parse("").unwrap().resolve().unwrap();
        assert!(config.services.is_empty());
    }
}
