//! TOML file configuration structures.
//!
//! These structs directly map to the `tagview-config.toml` file format.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tagview_core::config::{CoreConfig, ScannerSet};
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
    #[serde(default)]
    pub scanners: Vec<ScannerConfig>,
}

/// Inventory server endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Root URL of the inventory server's REST API.
    pub base_url: Url,

    /// Push (WebSocket) endpoint. Derived from `base_url` when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_url: Option<Url>,
}

/// Reconciliation tuning section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// TTL for pending transactions, in milliseconds.
    #[serde(default = "default_pending_ttl_ms")]
    pub pending_ttl_ms: u64,

    /// Pending-table sweep interval, in milliseconds.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Page size for authoritative queries.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_pending_ttl_ms() -> u64 {
    5_000
}

fn default_sweep_interval_ms() -> u64 {
    1_000
}

fn default_page_size() -> u32 {
    50
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            pending_ttl_ms: default_pending_ttl_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            page_size: default_page_size(),
        }
    }
}

/// One physical scanner whose channel should be live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Scanner id, e.g. `dock-3`.
    pub id: CompactString,
}

impl FileConfig {
    /// The core tuning this file configures.
    pub fn core_config(&self) -> CoreConfig {
        CoreConfig {
            pending_ttl: Duration::from_millis(self.console.pending_ttl_ms),
            sweep_interval: Duration::from_millis(self.console.sweep_interval_ms),
            page_size: self.console.page_size,
            ..CoreConfig::default()
        }
    }

    /// The scanner set this file configures.
    pub fn scanner_set(&self) -> ScannerSet {
        ScannerSet {
            scanner_ids: self.scanners.iter().map(|s| s.id.clone()).collect(),
        }
    }

    /// The push endpoint: explicit `push_url`, or `base_url` with the
    /// scheme flipped to WebSocket and the push path appended.
    pub fn push_endpoint(&self) -> Result<Url, url::ParseError> {
        if let Some(push_url) = &self.server.push_url {
            return Ok(push_url.clone());
        }

        let mut url = self.server.base_url.join("/api/v1/push")?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        // set_scheme only rejects invalid transitions, which ws/wss is not.
        let _ = url.set_scheme(scheme);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parsing_with_defaults() {
        let toml_str = r#"
[server]
base_url = "https://inventory.example.com"

[[scanners]]
id = "dock-3"

[[scanners]]
id = "gate-1"
"#;
        let config: FileConfig = toml::from_str(toml_str).expect("valid config");
        assert_eq!(config.console.pending_ttl_ms, 5_000);
        assert_eq!(config.console.page_size, 50);
        assert_eq!(config.scanners.len(), 2);
        assert_eq!(
            config.scanner_set().scanner_ids,
            vec![CompactString::from("dock-3"), CompactString::from("gate-1")]
        );
    }

    #[test]
    fn test_push_endpoint_derived_from_base_url() {
        let toml_str = r#"
[server]
base_url = "https://inventory.example.com"
"#;
        let config: FileConfig = toml::from_str(toml_str).expect("valid config");
        assert_eq!(
            config.push_endpoint().expect("valid url").as_str(),
            "wss://inventory.example.com/api/v1/push"
        );
    }

    #[test]
    fn test_explicit_push_url_wins() {
        let toml_str = r#"
[server]
base_url = "https://inventory.example.com"
push_url = "wss://push.example.com/feed"

[console]
pending_ttl_ms = 2500
"#;
        let config: FileConfig = toml::from_str(toml_str).expect("valid config");
        assert_eq!(
            config.push_endpoint().expect("valid url").as_str(),
            "wss://push.example.com/feed"
        );
        assert_eq!(
            config.core_config().pending_ttl,
            Duration::from_millis(2_500)
        );
    }
}
