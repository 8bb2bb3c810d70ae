//! Configuration for the cubeflow services
//!
//! Values are resolved in layers: built-in defaults, an optional TOML file,
//! environment variables, and finally command-line flags (applied by the
//! `cli` module on top of what this module returns).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CubeflowError, ErrorCode};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "CUBEFLOW_CONFIG";

/// Settings shared by the fetch worker, the result server and the garbage collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Broker address, `host[:port]` or a full `redis://` / `rediss://` url
    pub redis_url: String,

    /// Broker password
    pub redis_password: Option<String>,

    /// Connect to the broker over TLS
    pub secure: bool,

    /// Connection pool size for the broker client
    pub pool_size: usize,

    /// Stream the scheduler publishes tasks on
    pub stream: String,

    /// Consumer group the fetch workers read with
    pub group: String,

    /// Consumer identity of this worker, generated when absent
    pub consumer_id: Option<String>,

    /// Concurrent fragment downloads per part
    pub jobs: usize,

    /// Parts a worker gathers at once; further queue entries stay unread
    /// for other consumers
    pub parts: usize,

    /// Retries per fragment before the part fails
    pub retries: u32,

    /// First backoff delay between fragment retries
    #[serde(with = "humantime_serde")]
    pub retry_initial_delay: Duration,

    /// Ceiling for the backoff delay
    #[serde(with = "humantime_serde")]
    pub retry_max_delay: Duration,

    /// Timeout of a single fragment download
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,

    /// Block timeout for queue reads, doubles as the worker heartbeat
    #[serde(with = "humantime_serde")]
    pub heartbeat: Duration,

    /// Expiry of process headers and result logs after the last write
    #[serde(with = "humantime_serde")]
    pub result_ttl: Duration,

    /// How long a blocking result read waits before giving up
    #[serde(with = "humantime_serde")]
    pub result_timeout: Duration,

    /// Idle duration before a consumer is garbage
    #[serde(with = "humantime_serde")]
    pub gc_threshold: Duration,

    /// Port for the result server
    pub port: u16,

    /// Fragment cache capacity in entries, 0 disables the cache
    pub cache_entries: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_url: String::new(),
            redis_password: None,
            secure: false,
            pool_size: 16,
            stream: "jobs".to_string(),
            group: "fetch".to_string(),
            consumer_id: None,
            jobs: 30,
            parts: 4,
            retries: 0,
            retry_initial_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(30),
            heartbeat: Duration::from_secs(5),
            result_ttl: Duration::from_secs(10 * 60),
            result_timeout: Duration::from_secs(15),
            gc_threshold: Duration::from_secs(30 * 60),
            port: 8080,
            cache_entries: 4096,
        }
    }
}

impl Settings {
    /// Load settings from an explicit path, `CUBEFLOW_CONFIG`, or the user
    /// config directory, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, CubeflowError> {
        let mut settings = match resolve_config_path(path) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self, CubeflowError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CubeflowError::config_with_code(
                ErrorCode::CONFIG_NOT_FOUND,
                format!("Unable to read config file {}", path.display()),
            )
            .with_source(e)
        })?;
        Self::from_toml(&content).map_err(|e| e.with_context(path.display()))
    }

    /// Parse settings from TOML text
    pub fn from_toml(content: &str) -> Result<Self, CubeflowError> {
        toml::from_str(content).map_err(|e| {
            CubeflowError::config_with_code(ErrorCode::CONFIG_PARSE_ERROR, "Invalid config file")
                .with_source(e)
        })
    }

    /// Apply environment overrides through a lookup function
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), CubeflowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("REDIS_URL") {
            self.redis_url = url;
        }
        if let Some(password) = lookup("REDIS_PASSWORD").filter(|p| !p.is_empty()) {
            self.redis_password = Some(password);
        }
        if let Some(stream) = lookup("CUBEFLOW_STREAM") {
            self.stream = stream;
        }
        if let Some(group) = lookup("CUBEFLOW_GROUP") {
            self.group = group;
        }
        if let Some(jobs) = lookup("CUBEFLOW_JOBS") {
            self.jobs = parse_env("CUBEFLOW_JOBS", &jobs)?;
        }
        if let Some(parts) = lookup("CUBEFLOW_PARTS") {
            self.parts = parse_env("CUBEFLOW_PARTS", &parts)?;
        }
        if let Some(retries) = lookup("CUBEFLOW_RETRIES") {
            self.retries = parse_env("CUBEFLOW_RETRIES", &retries)?;
        }
        if let Some(ttl) = lookup("CUBEFLOW_RESULT_TTL") {
            self.result_ttl = parse_env_duration("CUBEFLOW_RESULT_TTL", &ttl)?;
        }
        if let Some(threshold) = lookup("CUBEFLOW_GC_THRESHOLD") {
            self.gc_threshold = parse_env_duration("CUBEFLOW_GC_THRESHOLD", &threshold)?;
        }
        if let Some(port) = lookup("CUBEFLOW_PORT") {
            self.port = parse_env("CUBEFLOW_PORT", &port)?;
        }
        Ok(())
    }

    /// Reject settings the services cannot run with
    pub fn validate(&self) -> Result<(), CubeflowError> {
        if self.redis_url.trim().is_empty() {
            return Err(invalid("redis_url is required"));
        }
        if self.jobs == 0 {
            return Err(invalid("jobs must be at least 1"));
        }
        if self.parts == 0 {
            return Err(invalid("parts must be at least 1"));
        }
        if self.pool_size == 0 {
            return Err(invalid("pool_size must be at least 1"));
        }
        if self.result_ttl.is_zero() {
            return Err(invalid("result_ttl must be positive"));
        }
        if self.retry_max_delay < self.retry_initial_delay {
            return Err(invalid("retry_max_delay must not be below retry_initial_delay"));
        }
        Ok(())
    }

    /// Connection url for the broker, built from address, password and TLS flag
    pub fn broker_url(&self) -> String {
        let address = self.redis_url.trim();
        if address.starts_with("redis://") || address.starts_with("rediss://") {
            return address.to_string();
        }
        let scheme = if self.secure { "rediss" } else { "redis" };
        match &self.redis_password {
            Some(password) => format!("{}://:{}@{}", scheme, password, address),
            None => format!("{}://{}", scheme, address),
        }
    }
}

fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir()
        .map(|dir| dir.join("cubeflow").join("config.toml"))
        .filter(|path| path.exists())
}

fn invalid(message: &str) -> CubeflowError {
    CubeflowError::config_with_code(ErrorCode::CONFIG_INVALID_VALUE, message)
}

fn parse_env<T>(key: &str, value: &str) -> Result<T, CubeflowError>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .map_err(|e| invalid(&format!("{} = {:?} is not valid", key, value)).with_source(e))
}

fn parse_env_duration(key: &str, value: &str) -> Result<Duration, CubeflowError> {
    humantime::parse_duration(value.trim())
        .map_err(|e| invalid(&format!("{} = {:?} is not a duration", key, value)).with_source(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_service_conventions() {
        let settings = Settings::default();
        assert_eq!(settings.stream, "jobs");
        assert_eq!(settings.group, "fetch");
        assert_eq!(settings.jobs, 30);
        assert_eq!(settings.retries, 0);
        assert_eq!(settings.result_ttl, Duration::from_secs(600));
        assert_eq!(settings.gc_threshold, Duration::from_secs(1800));
    }

    #[test]
    fn test_toml_with_humantime_durations() {
        let settings = Settings::from_toml(
            r#"
            redis_url = "localhost:6379"
            jobs = 8
            heartbeat = "2s"
            result_ttl = "5m"
            "#,
        )
        .unwrap();
        assert_eq!(settings.jobs, 8);
        assert_eq!(settings.heartbeat, Duration::from_secs(2));
        assert_eq!(settings.result_ttl, Duration::from_secs(300));
        assert_eq!(settings.stream, "jobs");
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let err = Settings::from_toml("jobs = \"many\"").unwrap_err();
        assert_eq!(err.code(), ErrorCode::CONFIG_PARSE_ERROR);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "redis_url = \"cache:6380\"\nport = 9000").unwrap();
        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.redis_url, "cache:6380");
        assert_eq!(settings.port, 9000);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = Settings::from_file(Path::new("/nonexistent/cubeflow.toml")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CONFIG_NOT_FOUND);
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        settings
            .apply_env(env(&[
                ("REDIS_URL", "redis:6379"),
                ("REDIS_PASSWORD", "secret"),
                ("CUBEFLOW_JOBS", "4"),
                ("CUBEFLOW_GC_THRESHOLD", "45m"),
            ]))
            .unwrap();
        assert_eq!(settings.redis_url, "redis:6379");
        assert_eq!(settings.redis_password.as_deref(), Some("secret"));
        assert_eq!(settings.jobs, 4);
        assert_eq!(settings.gc_threshold, Duration::from_secs(45 * 60));
    }

    #[test]
    fn test_env_bad_number_rejected() {
        let mut settings = Settings::default();
        let err = settings
            .apply_env(env(&[("CUBEFLOW_JOBS", "lots")]))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CONFIG_INVALID_VALUE);
    }

    #[test]
    fn test_validate() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_err());
        settings.redis_url = "localhost:6379".into();
        assert!(settings.validate().is_ok());
        settings.jobs = 0;
        assert!(settings.validate().is_err());
        settings.jobs = 30;
        settings.parts = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_broker_url() {
        let mut settings = Settings {
            redis_url: "localhost:6379".into(),
            ..Default::default()
        };
        assert_eq!(settings.broker_url(), "redis://localhost:6379");
        settings.redis_password = Some("pw".into());
        settings.secure = true;
        assert_eq!(settings.broker_url(), "rediss://:pw@localhost:6379");
        settings.redis_url = "redis://other:1".into();
        assert_eq!(settings.broker_url(), "redis://other:1");
    }
}
