//! Configuration (§1.1 ambient stack).
//!
//! Grounded on the teacher's practice of keeping daemon configuration as
//! a plain `serde`-derived struct; this crate adds `toml` deserialization
//! on top since, unlike a kernel driver invoked with fixed arguments, a
//! usbip client daemon is normally configured from a file on disk.

use std::net::IpAddr;

use serde::Deserialize;

use crate::wire::USBIP_DEFAULT_PORT;

fn default_port() -> u16 {
    USBIP_DEFAULT_PORT
}

fn default_log_level() -> String {
    "info".to_owned()
}

/// Top-level daemon configuration, normally loaded from
/// `/etc/usbip-vhci/config.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub imports: Vec<ImportConfig>,
}

/// One remote device to import on startup, identified by host/port/bus_id.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportConfig {
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    pub bus_id: String,
    /// When set, the session is rejected (§8's USB-generation-retry
    /// scenario) unless the imported device reports a USB2 speed.
    #[serde(default)]
    pub require_usb2: Option<bool>,
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let cfg = Config::from_toml_str(
            r#"
            [[imports]]
            host = "127.0.0.1"
            bus_id = "1-1"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.imports.len(), 1);
        assert_eq!(cfg.imports[0].port, USBIP_DEFAULT_PORT);
    }

    #[test]
    fn honors_explicit_port_and_generation_requirement() {
        let cfg = Config::from_toml_str(
            r#"
            log_level = "debug"
            [[imports]]
            host = "10.0.0.5"
            port = 3241
            bus_id = "2-1"
            require_usb2 = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.imports[0].port, 3241);
        assert_eq!(cfg.imports[0].require_usb2, Some(true));
    }
}
