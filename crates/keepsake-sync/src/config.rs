//! Engine configuration loaded from environment variables.

use crate::batch::DEFAULT_BATCH_SIZE;
use crate::broadcast::DEFAULT_MAX_IN_FLIGHT;
use crate::error::{Error, Result};
use crate::relay::{NormalizeOptions, normalize_relay_list};
use crate::session::{DEFAULT_IDLE_TIMEOUT, DEFAULT_SESSION_DEADLINE, SessionLimits};
use std::str::FromStr;
use std::time::Duration;

/// Relays queried when no working set is configured.
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://relay.nostr.band",
    "wss://nos.lol",
    "wss://relay.snort.social",
    "wss://purplepag.es",
    "wss://relay.primal.net",
    "wss://nostr.wine",
    "wss://relay.nostr.bg",
];

/// Sync engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Working set for fetch passes, as given (normalized on use).
    pub relays: Vec<String>,

    /// Relays contacted concurrently within one batch.
    pub batch_size: usize,

    /// Per-relay idle window; also bounds connection setup.
    pub idle_timeout: Duration,

    /// Hard cap on one relay session.
    pub session_deadline: Duration,

    /// Unacknowledged publishes per relay during broadcast.
    pub max_in_flight: usize,

    /// Accept `.onion` relays.
    pub allow_onion: bool,

    /// Accept localhost and private-network relays.
    pub allow_private: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            relays: DEFAULT_RELAYS.iter().map(|s| s.to_string()).collect(),
            batch_size: DEFAULT_BATCH_SIZE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            session_deadline: DEFAULT_SESSION_DEADLINE,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            allow_onion: false,
            allow_private: false,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional:
    /// - `KEEPSAKE_RELAYS`: Comma-separated working set (default: built-in list)
    /// - `KEEPSAKE_BATCH_SIZE`: Relays per batch (default: 10)
    /// - `KEEPSAKE_IDLE_TIMEOUT_SECS`: Idle window per relay (default: 10)
    /// - `KEEPSAKE_RELAY_DEADLINE_SECS`: Session cap per relay (default: 120)
    /// - `KEEPSAKE_MAX_IN_FLIGHT`: Unacknowledged publishes per relay (default: 64)
    /// - `KEEPSAKE_ALLOW_ONION`: Accept .onion relays (default: false)
    /// - `KEEPSAKE_ALLOW_PRIVATE`: Accept local/private relays (default: false)
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let relays = match std::env::var("KEEPSAKE_RELAYS") {
            Ok(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            Err(_) => defaults.relays,
        };

        let config = Self {
            relays,
            batch_size: env_parse("KEEPSAKE_BATCH_SIZE")?.unwrap_or(defaults.batch_size),
            idle_timeout: env_parse("KEEPSAKE_IDLE_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
            session_deadline: env_parse("KEEPSAKE_RELAY_DEADLINE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.session_deadline),
            max_in_flight: env_parse("KEEPSAKE_MAX_IN_FLIGHT")?.unwrap_or(defaults.max_in_flight),
            allow_onion: env_flag("KEEPSAKE_ALLOW_ONION")?.unwrap_or(defaults.allow_onion),
            allow_private: env_flag("KEEPSAKE_ALLOW_PRIVATE")?.unwrap_or(defaults.allow_private),
        };
        config.validate()?;

        tracing::debug!(
            relays = config.relays.len(),
            batch_size = config.batch_size,
            idle_timeout_secs = config.idle_timeout.as_secs(),
            session_deadline_secs = config.session_deadline.as_secs(),
            max_in_flight = config.max_in_flight,
            "sync configuration loaded"
        );

        Ok(config)
    }

    /// Reject values that would stall or disable a pass.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch size must be at least 1".to_string()));
        }
        if self.idle_timeout.is_zero() {
            return Err(Error::Config("idle timeout must be positive".to_string()));
        }
        if self.session_deadline < self.idle_timeout {
            return Err(Error::Config(format!(
                "relay deadline ({}s) is shorter than the idle timeout ({}s)",
                self.session_deadline.as_secs(),
                self.idle_timeout.as_secs()
            )));
        }
        if self.max_in_flight == 0 {
            return Err(Error::Config("max in-flight must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn limits(&self) -> SessionLimits {
        SessionLimits {
            idle_timeout: self.idle_timeout,
            session_deadline: self.session_deadline,
        }
    }

    pub fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            allow_onion: self.allow_onion,
            allow_private: self.allow_private,
        }
    }

    /// Configured relays, normalized, filtered and deduplicated.
    pub fn working_set(&self) -> Vec<String> {
        normalize_relay_list(&self.relays, &self.normalize_options())
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{key}={raw:?}: {e}"))),
        Err(_) => Ok(None),
    }
}

fn env_flag(key: &str) -> Result<Option<bool>> {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "" => Ok(None),
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(Error::Config(format!("{key}={raw:?}: expected true or false"))),
        },
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize config tests that manipulate env vars.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "KEEPSAKE_RELAYS",
        "KEEPSAKE_BATCH_SIZE",
        "KEEPSAKE_IDLE_TIMEOUT_SECS",
        "KEEPSAKE_RELAY_DEADLINE_SECS",
        "KEEPSAKE_MAX_IN_FLIGHT",
        "KEEPSAKE_ALLOW_ONION",
        "KEEPSAKE_ALLOW_PRIVATE",
    ];

    /// Helper to run config tests with isolated env vars.
    fn with_env_vars<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());

        let saved: Vec<_> = ENV_KEYS
            .iter()
            .map(|k| (*k, std::env::var(k).ok()))
            .collect();

        // SAFETY: Serialized by mutex; only test code touches these vars.
        unsafe {
            for k in ENV_KEYS {
                std::env::remove_var(k);
            }
            for (k, v) in vars {
                std::env::set_var(k, v);
            }
        }

        f();

        // SAFETY: Restoring original env state.
        unsafe {
            for (k, v) in &saved {
                match v {
                    Some(val) => std::env::set_var(k, val),
                    None => std::env::remove_var(k),
                }
            }
        }
    }

    #[test]
    fn config_defaults() {
        with_env_vars(&[], || {
            let config = SyncConfig::from_env().unwrap();
            assert_eq!(config, SyncConfig::default());
            assert_eq!(config.batch_size, 10);
            assert_eq!(config.idle_timeout, Duration::from_secs(10));
            assert_eq!(config.session_deadline, Duration::from_secs(120));
            assert_eq!(config.max_in_flight, 64);
            assert_eq!(config.relays.len(), DEFAULT_RELAYS.len());
        });
    }

    #[test]
    fn config_custom_values() {
        with_env_vars(
            &[
                ("KEEPSAKE_RELAYS", "wss://a.example.com, wss://b.example.com,,"),
                ("KEEPSAKE_BATCH_SIZE", "5"),
                ("KEEPSAKE_IDLE_TIMEOUT_SECS", "3"),
                ("KEEPSAKE_RELAY_DEADLINE_SECS", "30"),
                ("KEEPSAKE_MAX_IN_FLIGHT", "8"),
                ("KEEPSAKE_ALLOW_ONION", "true"),
                ("KEEPSAKE_ALLOW_PRIVATE", "1"),
            ],
            || {
                let config = SyncConfig::from_env().unwrap();
                assert_eq!(
                    config.relays,
                    vec!["wss://a.example.com", "wss://b.example.com"]
                );
                assert_eq!(config.batch_size, 5);
                assert_eq!(config.limits().idle_timeout, Duration::from_secs(3));
                assert_eq!(config.limits().session_deadline, Duration::from_secs(30));
                assert_eq!(config.max_in_flight, 8);
                assert!(config.normalize_options().allow_onion);
                assert!(config.normalize_options().allow_private);
            },
        );
    }

    #[test]
    fn config_rejects_garbage_numbers() {
        with_env_vars(&[("KEEPSAKE_BATCH_SIZE", "ten")], || {
            let err = SyncConfig::from_env().unwrap_err();
            assert!(matches!(err, Error::Config(ref m) if m.contains("KEEPSAKE_BATCH_SIZE")));
        });
    }

    #[test]
    fn config_rejects_garbage_flags() {
        with_env_vars(&[("KEEPSAKE_ALLOW_ONION", "maybe")], || {
            assert!(matches!(SyncConfig::from_env(), Err(Error::Config(_))));
        });
    }

    #[test]
    fn config_rejects_zero_batch() {
        with_env_vars(&[("KEEPSAKE_BATCH_SIZE", "0")], || {
            assert!(matches!(SyncConfig::from_env(), Err(Error::Config(_))));
        });
    }

    #[test]
    fn config_rejects_deadline_shorter_than_idle() {
        with_env_vars(
            &[
                ("KEEPSAKE_IDLE_TIMEOUT_SECS", "20"),
                ("KEEPSAKE_RELAY_DEADLINE_SECS", "5"),
            ],
            || {
                assert!(matches!(SyncConfig::from_env(), Err(Error::Config(_))));
            },
        );
    }

    #[test]
    fn working_set_is_normalized() {
        let config = SyncConfig {
            relays: vec![
                "wss://nos.lol/".to_string(),
                "wss://NOS.lol".to_string(),
                "ws://127.0.0.1:7777".to_string(),
            ],
            ..Default::default()
        };
        assert_eq!(config.working_set(), vec!["wss://nos.lol"]);

        let local = SyncConfig {
            allow_private: true,
            ..config
        };
        assert_eq!(local.working_set().len(), 2);
    }
}
