use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use std::time::Duration;
use std::{
    fs::File,
    path::{Path, PathBuf},
};
use thiserror::*;
use url::Url;

pub const CHANNEL_SIZE: usize = 64;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("io error {0} when reading config")]
    IoError(#[from] std::io::Error),
    #[error("cannot open config file '{0}' : {1}")]
    OpeningError(PathBuf, std::io::Error),
    #[error("UTF8 format error when reading config")]
    Utf8Error,
    #[error("format error {0} when reading config")]
    FormatError(#[from] serde_yaml::Error),
    #[error("format error {0} when reading config")]
    TomlFormatError(#[from] toml::de::Error),
}

mod duration {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            match Option::<String>::deserialize(deserializer)? {
                Some(s) => humantime::parse_duration(&s)
                    .map(Some)
                    .map_err(serde::de::Error::custom),
                None => Ok(None),
            }
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Listen {
    #[serde(default = "Listen::default_host")]
    pub host: String,
    pub port: u16,
    pub concurrent: Option<usize>,
    #[serde(default = "Listen::default_timeout", with = "duration")]
    pub timeout: Duration,
}

impl Listen {
    fn default_host() -> String {
        "0.0.0.0".into()
    }

    fn default_timeout() -> Duration {
        Duration::from_secs(30)
    }
}

impl Default for Listen {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: 5001,
            concurrent: Some(64),
            timeout: Self::default_timeout(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct StorageConfig {
    pub url: Url,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: Url::parse("memory://").expect("static url is valid"),
        }
    }
}

/// Board name to storage partition mapping.
///
/// Names in `named` are matched case-insensitively; anything else lands in `default`.
#[derive(Clone, Debug, Deserialize)]
pub struct BoardsConfig {
    pub default: String,
    #[serde(default)]
    pub named: HashMap<String, String>,
}

impl Default for BoardsConfig {
    fn default() -> Self {
        let mut named = HashMap::new();
        named.insert("sales".to_string(), "Sales".to_string());
        Self {
            default: "R&D".into(),
            named,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default, with = "duration::option")]
    pub interval: Option<Duration>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct HttpConfig {
    /// Map errors to 4xx/5xx codes instead of a blanket 500.
    #[serde(default)]
    pub strict_status: bool,
}

#[derive(Deserialize)]
pub struct Config {
    #[serde(default)]
    pub listen: Listen,
    #[serde(default)]
    pub storage: StorageConfig,
    pub log: Option<crate::log::Log>,
    #[serde(default)]
    pub boards: BoardsConfig,
    #[serde(default)]
    pub counter: RetryConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: Listen::default(),
            storage: StorageConfig::default(),
            log: None,
            boards: BoardsConfig::default(),
            counter: RetryConfig::default(),
            reconcile: ReconcileConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Config {
    pub fn from_str(s: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(s)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let p = path.as_ref();
        let mut file = File::open(p).map_err(|e| ConfigError::OpeningError(p.to_owned(), e))?;
        let mut contents = vec![];
        file.read_to_end(&mut contents)?;
        let contents = String::from_utf8(contents).map_err(|_| ConfigError::Utf8Error)?;
        let config = match p.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&contents)?,
            _ => Config::from_str(&contents)?,
        };
        Ok(config)
    }
}

/// Backoff for optimistic transactions.
#[derive(Clone, Debug, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub interval_ms: u64,
    pub max_interval_ms: u64,
}

impl RetryConfig {
    pub fn new(max_retries: u32, interval_ms: u64, max_interval_ms: u64) -> Self {
        Self {
            max_retries,
            interval_ms,
            max_interval_ms,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig::new(25, 2, 200)
    }
}

pub mod testdata {
    use super::Config;

    #[allow(dead_code)]
    pub fn test_config() -> Config {
        Config::from_str(
            r#"
        log:
            level: trace
            backend:
                type: Stdout
            structured: false
        storage:
            url: "memory://"
        listen:
            port: 50055
            concurrent: 10
            timeout: 2s
        boards:
            default: "R&D"
            named:
                sales: Sales
                Marketing: Marketing
        counter:
            max_retries: 50
            interval_ms: 1
            max_interval_ms: 20
        reconcile:
            interval: 5m
        http:
            strict_status: true
        "#,
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let config = testdata::test_config();

        assert_eq!(config.listen.port, 50055);
        assert_eq!(config.listen.host, "0.0.0.0");
        assert_eq!(config.listen.timeout, Duration::from_secs(2));
        assert_eq!(config.storage.url.scheme(), "memory");
        assert_eq!(config.boards.default, "R&D");
        assert_eq!(config.boards.named.len(), 2);
        assert_eq!(config.counter.max_retries, 50);
        assert_eq!(config.reconcile.interval, Some(Duration::from_secs(300)));
        assert!(config.http.strict_status);
        assert_eq!(config.log.unwrap().level, "trace");
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_str("listen:\n    port: 8080\n").unwrap();

        assert_eq!(config.listen.port, 8080);
        assert_eq!(config.listen.timeout, Duration::from_secs(30));
        assert_eq!(config.boards.default, "R&D");
        assert_eq!(config.boards.named["sales"], "Sales");
        assert_eq!(config.reconcile.interval, None);
        assert!(!config.http.strict_status);
        assert!(config.log.is_none());
    }

    #[test]
    fn test_sample_config_file() {
        let config = Config::from_file("config/taskboard.yaml").unwrap();

        assert_eq!(config.listen.port, 5001);
        assert_eq!(config.listen.concurrent, Some(64));
        assert_eq!(config.reconcile.interval, None);
        assert_eq!(config.counter.max_retries, 25);
    }

    #[test]
    fn test_missing_config_file() {
        assert!(matches!(
            Config::from_file("config/missing.yaml"),
            Err(ConfigError::OpeningError(_, _))
        ));
    }

    #[test]
    fn test_bad_duration() {
        assert!(Config::from_str("listen:\n    port: 1\n    timeout: soon\n").is_err());
    }
}
