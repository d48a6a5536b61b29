//! Flat configuration options the core consumes (spec.md §6, §11).
//!
//! Loading a config file from disk is a host-application concern (out
//! of scope per spec.md §1); this module only defines the shape and
//! the startup contract's validation.

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServerIpType {
    #[default]
    Inet4,
    Inet6,
}

fn default_reconnect_interval_ms() -> u64 {
    5_000
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub server: String,

    #[serde(default)]
    pub server_ip_type: ServerIpType,

    pub port: u16,

    #[serde(default)]
    pub use_ssl: bool,

    pub bot_name: String,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub channels: Vec<String>,

    /// Prefix for synthesized help commands; `None` disables the help
    /// surface (spec.md §4.4).
    #[serde(default)]
    pub help_cmd: Option<String>,

    /// Milliseconds between reconnect attempts, uniformly for both plain
    /// and TLS connections (see SPEC_FULL.md §4.2, Open Question 1).
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Liveness deadline in milliseconds; `None` disables the check.
    #[serde(default)]
    pub server_timeout_ms: Option<u64>,
}

impl Config {
    /// Startup contract (spec.md §6): refuse to start unless `bot_name`,
    /// `server`, and `port` are present. `port` is a non-optional `u16`
    /// in this shape, so only `bot_name` and `server` can actually be
    /// missing (empty) at this layer.
    pub fn validate(&self) -> Result<()> {
        if self.bot_name.is_empty() {
            return Err(Error::Config {
                missing: "bot_name",
            });
        }
        if self.server.is_empty() {
            return Err(Error::Config { missing: "server" });
        }
        if self.port == 0 {
            return Err(Error::Config { missing: "port" });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            server: "irc.example".into(),
            server_ip_type: ServerIpType::Inet4,
            port: 6667,
            use_ssl: false,
            bot_name: "mybot".into(),
            password: None,
            channels: vec!["#chan".into()],
            help_cmd: Some("!help".into()),
            reconnect_interval_ms: 5_000,
            server_timeout_ms: None,
        }
    }

    #[test]
    fn validate_accepts_complete_config() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_bot_name() {
        let mut cfg = valid();
        cfg.bot_name.clear();
        assert!(matches!(
            cfg.validate(),
            Err(Error::Config { missing: "bot_name" })
        ));
    }

    #[test]
    fn validate_rejects_zero_port() {
        let mut cfg = valid();
        cfg.port = 0;
        assert!(matches!(
            cfg.validate(),
            Err(Error::Config { missing: "port" })
        ));
    }

    #[test]
    fn deserialize_from_yaml_applies_defaults() {
        let yaml = "server: irc.example\nport: 6667\nbot_name: mybot\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.server_ip_type, ServerIpType::Inet4);
        assert!(!cfg.use_ssl);
        assert!(cfg.channels.is_empty());
        assert!(cfg.help_cmd.is_none());
        assert_eq!(cfg.reconnect_interval_ms, 5_000);
        assert!(cfg.server_timeout_ms.is_none());
    }
}
