use std::{env, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;

use crate::database::{DatabaseConfig, DatabaseKind};
use crate::mcp::server::DispatcherSettings;
use crate::transport::{HttpTransportConfig, TransportKind};

#[derive(Debug, Clone)]
pub struct Config {
    pub transport: TransportKind,
    pub db_kind: DatabaseKind,
    pub db_path: PathBuf,
    pub db_read_only: bool,
    pub connect_timeout: Duration,
    pub query_timeout: Duration,
    pub ping_timeout: Duration,
    pub max_rows: usize,
    pub max_query_length: usize,
    pub bind_addr: String,
    pub bind_port: u16,
    pub cors_origins: Vec<String>,
    pub api_key: Option<String>,
    pub queue_capacity: usize,
    pub enqueue_timeout: Duration,
    pub response_timeout: Duration,
    pub shutdown_grace: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DB_PATH is required and must not be empty")]
    MissingDbPath,
    #[error("TRANSPORT_TYPE must be stdio or http, got {0:?}")]
    UnsupportedTransport(String),
    #[error("DB_TYPE {0:?} is not supported")]
    UnsupportedDatabase(String),
    #[error("{name} has invalid value {value:?}")]
    InvalidValue { name: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
    #[error("invalid bind address or port")]
    InvalidSocket,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source. Blank
    /// values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let transport = match var("TRANSPORT_TYPE") {
            Some(value) => value
                .parse::<TransportKind>()
                .map_err(ConfigError::UnsupportedTransport)?,
            None => TransportKind::Stdio,
        };
        let db_kind = match var("DB_TYPE") {
            Some(value) => value
                .parse::<DatabaseKind>()
                .map_err(ConfigError::UnsupportedDatabase)?,
            None => DatabaseKind::Sqlite,
        };
        let db_path = var("DB_PATH")
            .map(PathBuf::from)
            .ok_or(ConfigError::MissingDbPath)?;

        let config = Self {
            transport,
            db_kind,
            db_path,
            db_read_only: parse_bool("DB_READ_ONLY", var("DB_READ_ONLY"), true)?,
            connect_timeout: parse_seconds("DB_CONN_TIMEOUT_SEC", var("DB_CONN_TIMEOUT_SEC"), 10)?,
            query_timeout: parse_seconds("QUERY_TIMEOUT_SEC", var("QUERY_TIMEOUT_SEC"), 30)?,
            ping_timeout: parse_seconds("PING_TIMEOUT_SEC", var("PING_TIMEOUT_SEC"), 5)?,
            max_rows: parse_positive("MAX_ROWS", var("MAX_ROWS"), 1_000)?,
            max_query_length: parse_positive("MAX_QUERY_LENGTH", var("MAX_QUERY_LENGTH"), 10_000)?,
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".to_string()),
            bind_port: parse_number("BIND_PORT", var("BIND_PORT"), 8080)?,
            cors_origins: var("HTTP_CORS_ORIGINS")
                .map(|value| {
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_else(|| vec!["*".to_string()]),
            api_key: var("HTTP_API_KEY"),
            queue_capacity: parse_positive("HTTP_QUEUE_CAPACITY", var("HTTP_QUEUE_CAPACITY"), 10)?,
            enqueue_timeout: parse_seconds(
                "HTTP_ENQUEUE_TIMEOUT_SEC",
                var("HTTP_ENQUEUE_TIMEOUT_SEC"),
                5,
            )?,
            response_timeout: parse_seconds(
                "HTTP_RESPONSE_TIMEOUT_SEC",
                var("HTTP_RESPONSE_TIMEOUT_SEC"),
                60,
            )?,
            shutdown_grace: parse_seconds("SHUTDOWN_GRACE_SEC", var("SHUTDOWN_GRACE_SEC"), 5)?,
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }

    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig {
            kind: self.db_kind,
            path: self.db_path.clone(),
            read_only: self.db_read_only,
        }
    }

    pub fn dispatcher_settings(&self) -> DispatcherSettings {
        DispatcherSettings {
            max_rows: self.max_rows,
            max_query_length: self.max_query_length,
            tool_timeout: self.query_timeout,
            ping_timeout: self.ping_timeout,
            connect_timeout: self.connect_timeout,
        }
    }

    pub fn http_transport_config(&self) -> Result<HttpTransportConfig, ConfigError> {
        Ok(HttpTransportConfig {
            bind: self.bind_socket()?,
            cors_origins: self.cors_origins.clone(),
            api_key: self.api_key.clone(),
            queue_capacity: self.queue_capacity,
            enqueue_timeout: self.enqueue_timeout,
            response_timeout: self.response_timeout,
            shutdown_grace: self.shutdown_grace,
        })
    }
}

fn parse_number<T: FromStr>(
    name: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    value
        .map(|value| {
            value
                .parse::<T>()
                .map_err(|_| ConfigError::InvalidValue { name, value })
        })
        .transpose()
        .map(|parsed| parsed.unwrap_or(default))
}

fn parse_positive(
    name: &'static str,
    value: Option<String>,
    default: usize,
) -> Result<usize, ConfigError> {
    match parse_number(name, value, default)? {
        0 => Err(ConfigError::NotPositive(name)),
        parsed => Ok(parsed),
    }
}

fn parse_seconds(
    name: &'static str,
    value: Option<String>,
    default: u64,
) -> Result<Duration, ConfigError> {
    match parse_number(name, value, default)? {
        0 => Err(ConfigError::NotPositive(name)),
        seconds => Ok(Duration::from_secs(seconds)),
    }
}

fn parse_bool(name: &'static str, value: Option<String>, default: bool) -> Result<bool, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn parse_defaults() {
        let config = load(&[("DB_PATH", "/tmp/app.db")]).expect("config should parse");

        assert_eq!(config.transport, TransportKind::Stdio);
        assert_eq!(config.db_kind, DatabaseKind::Sqlite);
        assert!(config.db_read_only);
        assert_eq!(config.query_timeout, Duration::from_secs(30));
        assert_eq!(config.ping_timeout, Duration::from_secs(5));
        assert_eq!(config.max_rows, 1_000);
        assert_eq!(config.max_query_length, 10_000);
        assert_eq!(config.bind_addr, "127.0.0.1");
        assert_eq!(config.bind_port, 8080);
        assert_eq!(config.cors_origins, vec!["*".to_string()]);
        assert_eq!(config.api_key, None);
        assert_eq!(config.queue_capacity, 10);
        assert_eq!(config.response_timeout, Duration::from_secs(60));
    }

    #[test]
    fn missing_db_path_fails() {
        let err = load(&[("DB_PATH", "  ")]).expect_err("expected missing path error");
        assert!(matches!(err, ConfigError::MissingDbPath));
    }

    #[test]
    fn http_settings_are_read() {
        let config = load(&[
            ("DB_PATH", "/tmp/app.db"),
            ("TRANSPORT_TYPE", "HTTP"),
            ("BIND_ADDR", "0.0.0.0"),
            ("BIND_PORT", "9090"),
            ("HTTP_API_KEY", "secret"),
            ("HTTP_CORS_ORIGINS", "https://a.example, https://b.example,"),
            ("DB_READ_ONLY", "false"),
        ])
        .expect("config should parse");

        assert_eq!(config.transport, TransportKind::Http);
        assert!(!config.db_read_only);
        let http = config.http_transport_config().expect("http config");
        assert_eq!(http.bind, "0.0.0.0:9090".parse().expect("socket"));
        assert_eq!(http.api_key.as_deref(), Some("secret"));
        assert_eq!(
            http.cors_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }

    #[test]
    fn malformed_values_are_errors_not_defaults() {
        let cases = [
            ("MAX_ROWS", "lots"),
            ("QUERY_TIMEOUT_SEC", "-1"),
            ("BIND_PORT", "70000"),
            ("DB_READ_ONLY", "maybe"),
        ];

        for (name, value) in cases {
            let err = load(&[("DB_PATH", "/tmp/app.db"), (name, value)])
                .expect_err("expected invalid value");
            assert!(
                matches!(err, ConfigError::InvalidValue { name: failed, .. } if failed == name),
                "{name}={value} should be rejected"
            );
        }
    }

    #[test]
    fn zero_limits_are_rejected() {
        let err = load(&[("DB_PATH", "/tmp/app.db"), ("MAX_ROWS", "0")]).expect_err("zero rows");
        assert!(matches!(err, ConfigError::NotPositive("MAX_ROWS")));
    }

    #[test]
    fn unknown_transport_and_database_fail() {
        let err = load(&[("DB_PATH", "/tmp/app.db"), ("TRANSPORT_TYPE", "grpc")])
            .expect_err("bad transport");
        assert!(matches!(err, ConfigError::UnsupportedTransport(_)));

        let err = load(&[("DB_PATH", "/tmp/app.db"), ("DB_TYPE", "oracle")])
            .expect_err("bad database");
        assert!(matches!(err, ConfigError::UnsupportedDatabase(_)));
    }

    #[test]
    fn server_backends_are_not_built_in() {
        for db_type in ["mysql", "postgres"] {
            let err = load(&[("DB_PATH", "/tmp/app.db"), ("DB_TYPE", db_type)])
                .expect_err("no server backend");
            assert!(matches!(err, ConfigError::UnsupportedDatabase(name) if name == db_type));
        }
    }

    #[test]
    fn invalid_bind_address_fails() {
        let err = load(&[("DB_PATH", "/tmp/app.db"), ("BIND_ADDR", "not an address")])
            .expect_err("bad socket");
        assert!(matches!(err, ConfigError::InvalidSocket));
    }

    #[test]
    fn dispatcher_settings_follow_config() {
        let config = load(&[("DB_PATH", "/tmp/app.db"), ("QUERY_TIMEOUT_SEC", "12")])
            .expect("config should parse");
        let settings = config.dispatcher_settings();
        assert_eq!(settings.tool_timeout, Duration::from_secs(12));
        assert_eq!(settings.max_rows, 1_000);
    }
}
