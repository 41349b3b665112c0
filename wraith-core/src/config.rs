//! Process-wide configuration, loaded once from a JSON file at
//! start-up and never mutated afterward. Both binaries wrap the parsed
//! value in an `Arc` and thread it into every session. There is no
//! global mutable state anywhere in this crate.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::frame::FrameKey;

#[derive(Debug, Deserialize)]
struct RawGatewayConfig {
    key: String,
    server_ip: String,
    server_port: u16,
    listen_port: u16,
    #[serde(default)]
    user_name: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    global: bool,
}

/// Gateway-side configuration: where to listen for local SOCKS5
/// clients, where the Relay lives, the credentials to send on every
/// session (if any), and the split-horizon policy.
pub struct GatewayConfig {
    pub key: FrameKey,
    pub server_host: String,
    pub server_port: u16,
    pub listen_port: u16,
    pub credentials: Option<(String, String)>,
    /// `true` when unreachable-directly destinations should still be
    /// tried locally first (`global = false` in the JSON config).
    pub split_horizon: bool,
}

impl GatewayConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let raw: RawGatewayConfig =
            serde_json::from_str(text).map_err(|e| Error::Config(format!("{e}")))?;
        let key = FrameKey::from_hex(&raw.key)?;
        let credentials = match (raw.user_name, raw.password) {
            (Some(user), Some(pass)) => Some((user, pass)),
            (None, None) => None,
            _ => {
                return Err(Error::Config(
                    "user_name and password must both be present or both absent".into(),
                ))
            }
        };
        Ok(Self {
            key,
            server_host: raw.server_ip,
            server_port: raw.server_port,
            listen_port: raw.listen_port,
            credentials,
            split_horizon: !raw.global,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawUser {
    user_name: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct RawRelayConfig {
    key: String,
    listen_port: u16,
    #[serde(default)]
    require_auth: bool,
    #[serde(default)]
    users: Vec<RawUser>,
}

/// Relay-side configuration: where to listen for Gateway sessions,
/// whether the §4.3 auth handshake is required, and the seed users for
/// the bundled in-memory `CredentialStore`. A deployment backed by a
/// real table ignores `users` and builds its own store instead.
pub struct RelayConfig {
    pub key: FrameKey,
    pub listen_port: u16,
    pub require_auth: bool,
    pub users: Vec<(String, String)>,
}

impl RelayConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let raw: RawRelayConfig =
            serde_json::from_str(text).map_err(|e| Error::Config(format!("{e}")))?;
        let key = FrameKey::from_hex(&raw.key)?;
        Ok(Self {
            key,
            listen_port: raw.listen_port,
            require_auth: raw.require_auth,
            users: raw
                .users
                .into_iter()
                .map(|u| (u.user_name, u.password))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_HEX: &str = "30313233343536373839616263646566"; // "0123456789abcdef"

    #[test]
    fn parses_minimal_gateway_config() {
        let json = format!(
            r#"{{"key":"{KEY_HEX}","server_ip":"127.0.0.1","server_port":9999,"listen_port":1080}}"#
        );
        let cfg = GatewayConfig::from_json(&json).unwrap();
        assert_eq!(cfg.server_port, 9999);
        assert!(cfg.credentials.is_none());
        assert!(cfg.split_horizon, "global defaults to false");
    }

    #[test]
    fn global_true_disables_split_horizon() {
        let json = format!(
            r#"{{"key":"{KEY_HEX}","server_ip":"127.0.0.1","server_port":9999,"listen_port":1080,"global":true}}"#
        );
        let cfg = GatewayConfig::from_json(&json).unwrap();
        assert!(!cfg.split_horizon);
    }

    #[test]
    fn parses_credentials_when_both_present() {
        let json = format!(
            r#"{{"key":"{KEY_HEX}","server_ip":"127.0.0.1","server_port":9999,"listen_port":1080,"user_name":"alice","password":"hunter2"}}"#
        );
        let cfg = GatewayConfig::from_json(&json).unwrap();
        assert_eq!(
            cfg.credentials,
            Some(("alice".to_string(), "hunter2".to_string()))
        );
    }

    #[test]
    fn rejects_partial_credentials() {
        let json = format!(
            r#"{{"key":"{KEY_HEX}","server_ip":"127.0.0.1","server_port":9999,"listen_port":1080,"user_name":"alice"}}"#
        );
        assert!(matches!(
            GatewayConfig::from_json(&json),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn rejects_wrong_length_key() {
        let json = r#"{"key":"3031","server_ip":"127.0.0.1","server_port":9999,"listen_port":1080}"#;
        assert!(matches!(
            GatewayConfig::from_json(json),
            Err(Error::InvalidKeyLength(_))
        ));
    }

    #[test]
    fn parses_relay_config() {
        let json = format!(r#"{{"key":"{KEY_HEX}","listen_port":10010,"require_auth":true}}"#);
        let cfg = RelayConfig::from_json(&json).unwrap();
        assert_eq!(cfg.listen_port, 10010);
        assert!(cfg.require_auth);
    }
}
