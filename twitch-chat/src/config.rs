use std::fmt::{Debug, Formatter};
use std::time::Duration;

use serde::Deserialize;

fn default_host() -> String {
    "irc.twitch.tv".into()
}

fn default_port() -> u16 {
    6667
}

fn default_send_interval_ms() -> u64 {
    5000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_max_reconnect_delay_ms() -> u64 {
    30_000
}

#[derive(Clone, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    /// `oauth:...` token. Never logged.
    pub oauth: String,
    /// Channel to join after login, without `#`. Defaults to the username.
    #[serde(default)]
    pub channel: Option<String>,
    /// Minimum gap between two queued outgoing lines.
    #[serde(default = "default_send_interval_ms")]
    pub send_interval_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,
    #[serde(default)]
    pub verbose: bool,
}

impl ChatConfig {
    pub fn new(username: impl Into<String>, oauth: impl Into<String>) -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: username.into(),
            oauth: oauth.into(),
            channel: None,
            send_interval_ms: default_send_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            verbose: false,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn channel(&self) -> &str {
        self.channel.as_deref().unwrap_or(&self.username)
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }
}

impl Debug for ChatConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("oauth", &"<redacted>")
            .field("channel", &self.channel())
            .field("send_interval_ms", &self.send_interval_ms)
            .field("verbose", &self.verbose)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ChatConfig::new("bot", "oauth:abc");
        assert_eq!(config.addr(), "irc.twitch.tv:6667");
        assert_eq!(config.channel(), "bot");
        assert_eq!(config.send_interval(), Duration::from_secs(5));
        assert_eq!(config.max_reconnect_delay(), Duration::from_secs(30));
    }

    #[test]
    fn test_deserialize() {
        let json = r#"{ "username": "bot", "oauth": "oauth:abc", "channel": "other", "port": 6697 }"#;
        let config: ChatConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.addr(), "irc.twitch.tv:6697");
        assert_eq!(config.channel(), "other");
        assert_eq!(config.reconnect_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_debug_redacts_oauth() {
        let printed = format!("{:?}", ChatConfig::new("bot", "oauth:topsecret"));
        assert!(!printed.contains("topsecret"));
    }
}
