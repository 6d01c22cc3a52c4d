//! Process configuration.
//!
//! Read once at startup from environment variables; everything has a
//! sensible default so the binary runs unconfigured in a dev environment.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub default_baud: u32,
    pub supervisor_interval: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("SERVO_BUS_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            default_baud: std::env::var("SERVO_BUS_DEFAULT_BAUD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1_000_000),
            supervisor_interval: std::env::var("SERVO_BUS_SUPERVISOR_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or_else(|| Duration::from_millis(5000)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_unset() {
        std::env::remove_var("SERVO_BUS_BIND_ADDR");
        std::env::remove_var("SERVO_BUS_DEFAULT_BAUD");
        std::env::remove_var("SERVO_BUS_SUPERVISOR_INTERVAL_MS");
        let config = Config::from_env();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.default_baud, 1_000_000);
        assert_eq!(config.supervisor_interval, Duration::from_millis(5000));
    }
}
