//! JSON configuration provider.

use crate::config::RawConfig;
use crate::error::Result;

/// Provider for JSON configuration files.
pub struct JsonProvider;

impl super::ConfigProvider for JsonProvider {
    fn parse(&self, content: &str) -> Result<RawConfig> {
        Ok(serde_json::from_str(content)?)
    }

    fn supports_extension(&self, ext: &str) -> bool {
        ext == "json"
    }

    fn name(&self) -> &'static str {
        "JSON"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceMode;
    use crate::loaders::ConfigProvider;

    #[test]
    fn test_parse_services() {
        let content = r#"{
            "services": [
                {"name": "a", "command": "/bin/true", "mode": "oneshot"},
                {"name": "b", "command": "/bin/sleep 100", "restart_on_failure": false}
            ]
        }"#;

        let config = JsonProvider.parse(content).unwrap().resolve().unwrap();
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.services[0].mode, ServiceMode::Oneshot);
        assert!(!config.services[1].restart_on_failure);
    }
}
