use crate::query::{is_valid_range_width, ParameterPolicy};

use ringlog::Level;
use serde::Deserialize;

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Environment variable that overrides the configured backend address.
pub const BACKEND_ADDRESS_ENV: &str = "PROMETHEUS_ADDRESS";

/// Queries are never allowed to run longer than this.
pub const MAX_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize, Default, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    general: General,
    #[serde(default)]
    backend: Backend,
    #[serde(default)]
    query: Query,
    #[serde(default)]
    log: Log,
}

impl Config {
    pub fn load(path: &dyn AsRef<Path>) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("unable to open config file: {e}"))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        let config: Config =
            toml::from_str(content).map_err(|e| format!("failed to parse config file: {e}"))?;

        config.check()?;

        Ok(config)
    }

    /// Apply overrides taken from the process environment.
    pub fn apply_env(&mut self) -> Result<(), String> {
        self.apply_backend_address(std::env::var(BACKEND_ADDRESS_ENV).ok())
    }

    fn apply_backend_address(&mut self, address: Option<String>) -> Result<(), String> {
        if let Some(address) = address.filter(|a| !a.is_empty()) {
            self.backend.address = address;
            self.backend.check()?;
        }

        Ok(())
    }

    pub fn check(&self) -> Result<(), String> {
        self.general.check()?;
        self.backend.check()?;
        self.query.check()?;
        self.log.check()?;
        Ok(())
    }

    pub fn general(&self) -> &General {
        &self.general
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn log(&self) -> &Log {
        &self.log
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct General {
    #[serde(default = "listen")]
    listen: String,
}

impl Default for General {
    fn default() -> Self {
        Self { listen: listen() }
    }
}

impl General {
    fn check(&self) -> Result<(), String> {
        self.listen
            .parse::<SocketAddr>()
            .map(|_| ())
            .map_err(|e| format!("listen address is not valid: {}: {e}", self.listen))
    }

    pub fn listen(&self) -> SocketAddr {
        self.listen
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 8080)))
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Backend {
    #[serde(default = "address")]
    address: String,
    #[serde(default = "timeout")]
    timeout: String,
}

impl Default for Backend {
    fn default() -> Self {
        Self {
            address: address(),
            timeout: timeout(),
        }
    }
}

impl Backend {
    fn check(&self) -> Result<(), String> {
        // the client is built without tls support
        if !self.address.starts_with("http://") {
            return Err(format!(
                "backend address must be a plain http url: {}",
                self.address
            ));
        }

        let timeout = parse_duration("backend timeout", &self.timeout)?;

        if timeout.is_zero() {
            return Err("backend timeout must be non-zero".to_string());
        }

        if timeout > MAX_QUERY_TIMEOUT {
            return Err(format!(
                "backend timeout may not exceed {}: {}",
                humantime::format_duration(MAX_QUERY_TIMEOUT),
                self.timeout
            ));
        }

        Ok(())
    }

    pub fn address(&self) -> &str {
        self.address.trim_end_matches('/')
    }

    pub fn timeout(&self) -> Duration {
        parse_duration("backend timeout", &self.timeout).unwrap_or(MAX_QUERY_TIMEOUT)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Query {
    #[serde(default = "default_range_width")]
    default_range_width: String,
    #[serde(default = "averaging_window")]
    averaging_window: String,
    #[serde(default)]
    parameter_policy: ParameterPolicy,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            default_range_width: default_range_width(),
            averaging_window: averaging_window(),
            parameter_policy: ParameterPolicy::default(),
        }
    }
}

impl Query {
    fn check(&self) -> Result<(), String> {
        if !is_valid_range_width(&self.default_range_width) {
            return Err(format!(
                "default range width is not a valid duration: {}",
                self.default_range_width
            ));
        }

        if !is_valid_range_width(&self.averaging_window) {
            return Err(format!(
                "averaging window is not a valid duration: {}",
                self.averaging_window
            ));
        }

        Ok(())
    }

    pub fn default_range_width(&self) -> &str {
        &self.default_range_width
    }

    pub fn averaging_window(&self) -> &str {
        &self.averaging_window
    }

    pub fn parameter_policy(&self) -> ParameterPolicy {
        self.parameter_policy
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Log {
    #[serde(default = "log_level")]
    level: String,
}

impl Default for Log {
    fn default() -> Self {
        Self { level: log_level() }
    }
}

impl Log {
    fn check(&self) -> Result<(), String> {
        parse_level(&self.level).map(|_| ())
    }

    /// The configured level, raised one step for each `verbose` increment.
    pub fn level(&self, verbose: u8) -> Level {
        let level = parse_level(&self.level).unwrap_or(Level::Info);

        match (level, verbose) {
            (level, 0) => level,
            (Level::Error, 1) => Level::Warn,
            (Level::Error, 2) | (Level::Warn, 1) => Level::Info,
            (Level::Error, 3) | (Level::Warn, 2) | (Level::Info, 1) => Level::Debug,
            _ => Level::Trace,
        }
    }
}

fn parse_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "error" => Ok(Level::Error),
        "warn" => Ok(Level::Warn),
        "info" => Ok(Level::Info),
        "debug" => Ok(Level::Debug),
        "trace" => Ok(Level::Trace),
        other => Err(format!("unknown log level: {other}")),
    }
}

fn parse_duration(name: &str, value: &str) -> Result<Duration, String> {
    value
        .parse::<humantime::Duration>()
        .map(Into::into)
        .map_err(|e| format!("{name} is not a valid duration: {value}: {e}"))
}

// defaults

fn listen() -> String {
    "0.0.0.0:8080".into()
}

fn address() -> String {
    "http://localhost:9090".into()
}

fn timeout() -> String {
    "10s".into()
}

fn default_range_width() -> String {
    "5m".into()
}

fn averaging_window() -> String {
    "1h".into()
}

fn log_level() -> String {
    "info".into()
}
