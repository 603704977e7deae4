use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// The configuration surface the exchange engine consumes. Supplied
/// by the caller — this crate performs no discovery and has no
/// startup configuration loading of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub ip_address: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// `0` lets the OS assign the local UDP port.
    #[serde(default)]
    pub local_port: u16,
    #[serde(default = "default_update_period_ms")]
    pub update_period_ms: u16,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u16,
}

fn default_port() -> u16 {
    50001
}

fn default_update_period_ms() -> u16 {
    1000
}

fn default_timeout_ms() -> u16 {
    99
}

impl Default for TargetConfig {
    fn default() -> Self {
        TargetConfig {
            ip_address: "172.20.75.180".parse().expect("literal IPv4 address"),
            port: default_port(),
            local_port: 0,
            update_period_ms: default_update_period_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_match_the_documented_literals() {
        let config = TargetConfig::default();
        assert_eq!(config.ip_address.to_string(), "172.20.75.180");
        assert_eq!(config.port, 50001);
        assert_eq!(config.local_port, 0);
        assert_eq!(config.update_period_ms, 1000);
        assert_eq!(config.timeout_ms, 99);
    }
}
