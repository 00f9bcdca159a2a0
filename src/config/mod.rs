//! Application configuration.
//!
//! Layers, lowest precedence first:
//! 1. built-in defaults
//! 2. TOML file
//! 3. environment variables (`RAMPART_*`)
//! 4. command-line arguments (applied by the binary)
//!
//! A layer overrides a field only when it sets a non-default value.

pub mod error;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use rampart_constants::coordination::MAX_LOCK_TTL_MS;
use rampart_constants::coordination::MIN_LOCK_TTL_MS;
use rampart_constants::network::DEFAULT_STORE_POOL_SIZE;
use rampart_constants::network::MAX_STORE_POOL_SIZE;
use rampart_constants::network::MAX_STORE_TIMEOUT_MS;
use rampart_constants::DEFAULT_STORE_CONNECT_TIMEOUT_MS;
use rampart_constants::DEFAULT_STORE_OPERATION_TIMEOUT_MS;
use rampart_coordination::AdmissionConfig;
use rampart_coordination::CircuitBreakerConfig;
use rampart_coordination::LimitAlgorithm;
use rampart_coordination::LockConfig;
use rampart_coordination::RevocationConfig;
use rampart_coordination::TierLimits;
use rampart_rpc::RemoteStoreConfig;
use serde::Deserialize;
use serde::Serialize;
use snafu::ResultExt;

pub use error::ConfigError;
use error::ParseTomlSnafu;
use error::ReadFileSnafu;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub rate_limit: AdmissionConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSection,
    #[serde(default)]
    pub revocation: RevocationSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the coordination store lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Remote `rampart-store` server. `None` keeps the store in process.
    pub address: Option<String>,
    /// Listen address of the `rampart-store` binary.
    pub bind_addr: SocketAddr,
    pub connect_timeout_ms: u64,
    pub operation_timeout_ms: u64,
    pub pool_size: usize,
    /// How often the server sweeps expired keys.
    pub purge_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            address: None,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 7400)),
            connect_timeout_ms: DEFAULT_STORE_CONNECT_TIMEOUT_MS,
            operation_timeout_ms: DEFAULT_STORE_OPERATION_TIMEOUT_MS,
            pool_size: DEFAULT_STORE_POOL_SIZE,
            purge_interval_ms: 10_000,
        }
    }
}

impl StoreConfig {
    /// Client settings for the remote store, if one is configured.
    pub fn remote(&self) -> Option<RemoteStoreConfig> {
        self.address.as_ref().map(|address| RemoteStoreConfig {
            address: address.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            operation_timeout: Duration::from_millis(self.operation_timeout_ms),
            pool_size: self.pool_size,
        })
    }
}

/// Breaker defaults plus per-service overrides under `[circuit_breaker.services.<name>]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerSection {
    #[serde(flatten)]
    pub defaults: CircuitBreakerConfig,
    #[serde(default)]
    pub services: HashMap<String, CircuitBreakerConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RevocationSection {
    #[serde(flatten)]
    pub registry: RevocationConfig,
    /// SQLite ledger file. `None` keeps revocations in memory.
    #[serde(default)]
    pub ledger_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("invalid log format: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Compact,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        toml::from_str(&content).context(ParseTomlSnafu { path })
    }

    /// Load configuration from environment variables.
    ///
    /// Variables follow `RAMPART_<SECTION>_<FIELD>`, e.g.
    /// `RAMPART_STORE_ADDRESS` or `RAMPART_REVOCATION_FAIL_CLOSED`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            store: StoreConfig {
                address: parse_env("RAMPART_STORE_ADDRESS"),
                bind_addr: parse_env("RAMPART_STORE_BIND_ADDR").unwrap_or(d.store.bind_addr),
                connect_timeout_ms: parse_env("RAMPART_STORE_CONNECT_TIMEOUT_MS").unwrap_or(d.store.connect_timeout_ms),
                operation_timeout_ms: parse_env("RAMPART_STORE_OPERATION_TIMEOUT_MS")
                    .unwrap_or(d.store.operation_timeout_ms),
                pool_size: parse_env("RAMPART_STORE_POOL_SIZE").unwrap_or(d.store.pool_size),
                purge_interval_ms: parse_env("RAMPART_STORE_PURGE_INTERVAL_MS").unwrap_or(d.store.purge_interval_ms),
            },
            rate_limit: AdmissionConfig {
                scope: parse_env("RAMPART_RATE_LIMIT_SCOPE").unwrap_or(d.rate_limit.scope),
                algorithm: parse_env("RAMPART_RATE_LIMIT_ALGORITHM").unwrap_or(d.rate_limit.algorithm),
                fallback_window_ms: parse_env("RAMPART_RATE_LIMIT_FALLBACK_WINDOW_MS")
                    .unwrap_or(d.rate_limit.fallback_window_ms),
                tiers: d.rate_limit.tiers,
            },
            lock: LockConfig {
                default_ttl_ms: parse_env("RAMPART_LOCK_DEFAULT_TTL_MS").unwrap_or(d.lock.default_ttl_ms),
                local_fallback: parse_env("RAMPART_LOCK_LOCAL_FALLBACK").unwrap_or(d.lock.local_fallback),
            },
            circuit_breaker: CircuitBreakerSection {
                defaults: CircuitBreakerConfig {
                    failure_threshold: parse_env("RAMPART_CIRCUIT_BREAKER_FAILURE_THRESHOLD")
                        .unwrap_or(d.circuit_breaker.defaults.failure_threshold),
                    recovery_timeout_ms: parse_env("RAMPART_CIRCUIT_BREAKER_RECOVERY_TIMEOUT_MS")
                        .unwrap_or(d.circuit_breaker.defaults.recovery_timeout_ms),
                },
                services: HashMap::new(),
            },
            revocation: RevocationSection {
                registry: RevocationConfig {
                    expected_items: parse_env("RAMPART_REVOCATION_EXPECTED_ITEMS")
                        .unwrap_or(d.revocation.registry.expected_items),
                    false_positive_rate: parse_env("RAMPART_REVOCATION_FALSE_POSITIVE_RATE")
                        .unwrap_or(d.revocation.registry.false_positive_rate),
                    maintenance_interval_ms: parse_env("RAMPART_REVOCATION_MAINTENANCE_INTERVAL_MS")
                        .unwrap_or(d.revocation.registry.maintenance_interval_ms),
                    fail_closed: parse_env("RAMPART_REVOCATION_FAIL_CLOSED").unwrap_or(d.revocation.registry.fail_closed),
                },
                ledger_path: parse_env("RAMPART_REVOCATION_LEDGER_PATH"),
            },
            logging: LoggingConfig {
                level: parse_env("RAMPART_LOG_LEVEL").unwrap_or(d.logging.level),
                format: parse_env("RAMPART_LOG_FORMAT").unwrap_or(d.logging.format),
            },
        }
    }

    /// Defaults, overlaid with `path` if given, overlaid with the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = path {
            config.merge(Self::from_toml_file(path)?);
        }
        config.merge(Self::from_env());
        Ok(config)
    }

    /// Merge configuration from a higher-precedence source.
    ///
    /// Fields in `other` that differ from the defaults override `self`.
    pub fn merge(&mut self, other: Self) {
        let d = Self::default();

        if other.store.address.is_some() {
            self.store.address = other.store.address;
        }
        overlay(&mut self.store.bind_addr, other.store.bind_addr, d.store.bind_addr);
        overlay(&mut self.store.connect_timeout_ms, other.store.connect_timeout_ms, d.store.connect_timeout_ms);
        overlay(&mut self.store.operation_timeout_ms, other.store.operation_timeout_ms, d.store.operation_timeout_ms);
        overlay(&mut self.store.pool_size, other.store.pool_size, d.store.pool_size);
        overlay(&mut self.store.purge_interval_ms, other.store.purge_interval_ms, d.store.purge_interval_ms);

        overlay(&mut self.rate_limit.scope, other.rate_limit.scope, d.rate_limit.scope);
        overlay(&mut self.rate_limit.algorithm, other.rate_limit.algorithm, d.rate_limit.algorithm);
        overlay(
            &mut self.rate_limit.fallback_window_ms,
            other.rate_limit.fallback_window_ms,
            d.rate_limit.fallback_window_ms,
        );
        overlay(&mut self.rate_limit.tiers, other.rate_limit.tiers, d.rate_limit.tiers);

        overlay(&mut self.lock.default_ttl_ms, other.lock.default_ttl_ms, d.lock.default_ttl_ms);
        overlay(&mut self.lock.local_fallback, other.lock.local_fallback, d.lock.local_fallback);

        overlay(&mut self.circuit_breaker.defaults, other.circuit_breaker.defaults, d.circuit_breaker.defaults);
        self.circuit_breaker.services.extend(other.circuit_breaker.services);

        let (registry, default_registry) = (other.revocation.registry, d.revocation.registry);
        overlay(&mut self.revocation.registry.expected_items, registry.expected_items, default_registry.expected_items);
        overlay(
            &mut self.revocation.registry.false_positive_rate,
            registry.false_positive_rate,
            default_registry.false_positive_rate,
        );
        overlay(
            &mut self.revocation.registry.maintenance_interval_ms,
            registry.maintenance_interval_ms,
            default_registry.maintenance_interval_ms,
        );
        overlay(&mut self.revocation.registry.fail_closed, registry.fail_closed, default_registry.fail_closed);
        if other.revocation.ledger_path.is_some() {
            self.revocation.ledger_path = other.revocation.ledger_path;
        }

        overlay(&mut self.logging.level, other.logging.level, d.logging.level);
        overlay(&mut self.logging.format, other.logging.format, d.logging.format);
    }

    /// Reject values the primitives cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let store = &self.store;
        for (key, value) in [
            ("store.connect_timeout_ms", store.connect_timeout_ms),
            ("store.operation_timeout_ms", store.operation_timeout_ms),
        ] {
            if value == 0 || value > MAX_STORE_TIMEOUT_MS {
                return invalid(key, format!("must be in 1..={MAX_STORE_TIMEOUT_MS}, got {value}"));
            }
        }
        if store.pool_size == 0 || store.pool_size > MAX_STORE_POOL_SIZE {
            return invalid("store.pool_size", format!("must be in 1..={MAX_STORE_POOL_SIZE}, got {}", store.pool_size));
        }
        if store.purge_interval_ms == 0 {
            return invalid("store.purge_interval_ms", "must be non-zero".into());
        }
        if store.address.as_deref().is_some_and(|a| a.trim().is_empty()) {
            return invalid("store.address", "must not be empty".into());
        }

        if self.rate_limit.scope.is_empty() {
            return invalid("rate_limit.scope", "must not be empty".into());
        }
        if self.rate_limit.fallback_window_ms == 0 {
            return invalid("rate_limit.fallback_window_ms", "must be non-zero".into());
        }
        let tiers = &self.rate_limit.tiers;
        let algorithm = self.rate_limit.algorithm;
        check_tier("rate_limit.tiers.default", algorithm, tiers.default)?;
        check_tier("rate_limit.tiers.verified", algorithm, tiers.verified)?;
        check_tier("rate_limit.tiers.premium", algorithm, tiers.premium)?;

        if !(MIN_LOCK_TTL_MS..=MAX_LOCK_TTL_MS).contains(&self.lock.default_ttl_ms) {
            return invalid(
                "lock.default_ttl_ms",
                format!("must be in {MIN_LOCK_TTL_MS}..={MAX_LOCK_TTL_MS}, got {}", self.lock.default_ttl_ms),
            );
        }

        check_breaker("circuit_breaker", &self.circuit_breaker.defaults)?;
        for config in self.circuit_breaker.services.values() {
            check_breaker("circuit_breaker.services", config)?;
        }

        let revocation = &self.revocation.registry;
        if revocation.expected_items == 0 {
            return invalid("revocation.expected_items", "must be non-zero".into());
        }
        let p = revocation.false_positive_rate;
        if !(p > 0.0 && p < 1.0) {
            return invalid("revocation.false_positive_rate", format!("must be in (0, 1), got {p}"));
        }
        if revocation.maintenance_interval_ms == 0 {
            return invalid("revocation.maintenance_interval_ms", "must be non-zero".into());
        }

        Ok(())
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.revocation.registry.maintenance_interval_ms)
    }
}

fn overlay<T: PartialEq>(target: &mut T, value: T, default: T) {
    if value != default {
        *target = value;
    }
}

fn invalid(key: &'static str, reason: String) -> Result<(), ConfigError> {
    Err(ConfigError::Validation { key, reason })
}

fn check_tier(key: &'static str, algorithm: LimitAlgorithm, limits: TierLimits) -> Result<(), ConfigError> {
    match algorithm.check_limits(limits.capacity, limits.refill_rate) {
        Ok(()) => Ok(()),
        Err(e) => invalid(key, e.to_string()),
    }
}

fn check_breaker(key: &'static str, config: &CircuitBreakerConfig) -> Result<(), ConfigError> {
    if config.failure_threshold == 0 {
        return invalid(key, "failure_threshold must be non-zero".into());
    }
    if config.recovery_timeout_ms == 0 {
        return invalid(key, "recovery_timeout_ms must be non-zero".into());
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}
