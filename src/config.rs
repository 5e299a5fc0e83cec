use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::Error;

pub const DEFAULT_BASE_URL: &str = "https://www.wemportal.com";
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(1800);
pub const DEFAULT_API_SCAN_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_FUZZY_THRESHOLD: u8 = 90;
pub const DEFAULT_LANGUAGE: &str = "en";

/// Which upstream source(s) feed the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Api,
    Web,
    Both,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Api => "api",
            Mode::Web => "web",
            Mode::Both => "both",
        }
    }

    pub fn uses_api(&self) -> bool {
        matches!(self, Mode::Api | Mode::Both)
    }

    pub fn uses_web(&self) -> bool {
        matches!(self, Mode::Web | Mode::Both)
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "api" => Ok(Mode::Api),
            "web" => Ok(Mode::Web),
            "both" => Ok(Mode::Both),
            other => Err(Error::Protocol(format!("unknown mode: {other}"))),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct Config {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_scan_interval", deserialize_with = "seconds")]
    pub scan_interval: Duration,
    #[serde(default = "default_api_scan_interval", deserialize_with = "seconds")]
    pub api_scan_interval: Duration,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: u8,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_delay", deserialize_with = "seconds")]
    pub request_delay: Duration,
}

impl Config {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            mode: Mode::default(),
            scan_interval: DEFAULT_SCAN_INTERVAL,
            api_scan_interval: DEFAULT_API_SCAN_INTERVAL,
            language: DEFAULT_LANGUAGE.to_string(),
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            base_url: DEFAULT_BASE_URL.to_string(),
            request_delay: DEFAULT_REQUEST_DELAY,
        }
    }

    /// Cadence the scheduler should poll the engine at.
    pub fn update_interval(&self) -> Duration {
        match self.mode {
            Mode::Web => self.scan_interval,
            Mode::Api => self.api_scan_interval,
            Mode::Both => self.scan_interval.min(self.api_scan_interval),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("mode", &self.mode)
            .field("scan_interval", &self.scan_interval)
            .field("api_scan_interval", &self.api_scan_interval)
            .field("language", &self.language)
            .field("fuzzy_threshold", &self.fuzzy_threshold)
            .field("base_url", &self.base_url)
            .field("request_delay", &self.request_delay)
            .finish()
    }
}

fn seconds<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(d)?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(serde::de::Error::custom(format!("invalid duration: {secs}")));
    }
    Ok(Duration::from_secs_f64(secs))
}

fn default_scan_interval() -> Duration {
    DEFAULT_SCAN_INTERVAL
}

fn default_api_scan_interval() -> Duration {
    DEFAULT_API_SCAN_INTERVAL
}

fn default_request_delay() -> Duration {
    DEFAULT_REQUEST_DELAY
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

fn default_fuzzy_threshold() -> u8 {
    DEFAULT_FUZZY_THRESHOLD
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_minimal_json() {
        let config: Config =
            serde_json::from_str(r#"{"username": "u", "password": "p"}"#).unwrap();
        assert_eq!(config.mode, Mode::Api);
        assert_eq!(config.scan_interval, Duration::from_secs(1800));
        assert_eq!(config.api_scan_interval, Duration::from_secs(300));
        assert_eq!(config.language, "en");
        assert_eq!(config.fuzzy_threshold, 90);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn durations_are_seconds() {
        let config: Config = serde_json::from_str(
            r#"{"username": "u", "password": "p", "mode": "both",
                "scan_interval": 600, "api_scan_interval": 120, "request_delay": 0.25}"#,
        )
        .unwrap();
        assert_eq!(config.mode, Mode::Both);
        assert_eq!(config.update_interval(), Duration::from_secs(120));
        assert_eq!(config.request_delay, Duration::from_millis(250));
    }

    #[test]
    fn update_interval_per_mode() {
        let mut config = Config::new("u", "p");
        config.mode = Mode::Web;
        assert_eq!(config.update_interval(), DEFAULT_SCAN_INTERVAL);
        config.mode = Mode::Api;
        assert_eq!(config.update_interval(), DEFAULT_API_SCAN_INTERVAL);
    }

    #[test]
    fn debug_hides_password() {
        let config = Config::new("user", "hunter2");
        let shown = format!("{config:?}");
        assert!(shown.contains("user"));
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("Both".parse::<Mode>().unwrap(), Mode::Both);
        assert!("cloud".parse::<Mode>().is_err());
        assert!(Mode::Both.uses_api() && Mode::Both.uses_web());
        assert!(!Mode::Web.uses_api());
    }
}
