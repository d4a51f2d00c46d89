//! Engine configuration, with defaults and environment overrides.

/// Default number of write attempts before schema drift is treated as fatal.
pub const DEFAULT_MAX_WRITE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Total attempts for one optimistic write, counting drift retries.
    pub max_write_attempts: usize,
    /// Whether remote change notifications trigger a full reload.
    pub reload_on_change: bool,
    /// Whether stage and course completions leave a notification row behind.
    pub persist_notifications: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_write_attempts: DEFAULT_MAX_WRITE_ATTEMPTS,
            reload_on_change: true,
            persist_notifications: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// Optional:
    /// - `CURRICULUM_MAX_WRITE_ATTEMPTS`: positive integer (default: 5)
    /// - `CURRICULUM_RELOAD_ON_CHANGE`: `true`/`false` (default: true)
    /// - `CURRICULUM_PERSIST_NOTIFICATIONS`: `true`/`false` (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_write_attempts = match std::env::var("CURRICULUM_MAX_WRITE_ATTEMPTS") {
            Ok(raw) => match raw.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid(
                        "CURRICULUM_MAX_WRITE_ATTEMPTS",
                        "must be a positive integer",
                    ));
                }
            },
            Err(_) => defaults.max_write_attempts,
        };

        let reload_on_change = flag("CURRICULUM_RELOAD_ON_CHANGE", defaults.reload_on_change)?;
        let persist_notifications =
            flag("CURRICULUM_PERSIST_NOTIFICATIONS", defaults.persist_notifications)?;

        Ok(Self {
            max_write_attempts,
            reload_on_change,
            persist_notifications,
        })
    }
}

fn flag(key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(ConfigError::Invalid(key, "must be true or false")),
        },
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Serializes tests that touch the process environment.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const KEYS: [&str; 3] = [
        "CURRICULUM_MAX_WRITE_ATTEMPTS",
        "CURRICULUM_RELOAD_ON_CHANGE",
        "CURRICULUM_PERSIST_NOTIFICATIONS",
    ];

    /// Sets env vars for a test and restores them afterwards.
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            let mut guard = Self { vars: Vec::new() };
            for key in KEYS {
                guard.remove(key);
            }
            guard
        }

        fn set(&mut self, key: &str, value: &str) {
            self.vars.push((key.to_string(), env::var(key).ok()));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            self.vars.push((key.to_string(), env::var(key).ok()));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn defaults_when_unset() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::new();
        assert_eq!(EngineConfig::from_env().unwrap(), EngineConfig::default());
        assert_eq!(EngineConfig::default().max_write_attempts, 5);
    }

    #[test]
    fn overrides_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("CURRICULUM_MAX_WRITE_ATTEMPTS", "3");
        guard.set("CURRICULUM_RELOAD_ON_CHANGE", "false");
        guard.set("CURRICULUM_PERSIST_NOTIFICATIONS", "NO");

        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.max_write_attempts, 3);
        assert!(!config.reload_on_change);
        assert!(!config.persist_notifications);
    }

    #[test]
    fn rejects_zero_attempts() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("CURRICULUM_MAX_WRITE_ATTEMPTS", "0");
        let err = EngineConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("CURRICULUM_MAX_WRITE_ATTEMPTS"));
    }

    #[test]
    fn rejects_unparseable_flag() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("CURRICULUM_RELOAD_ON_CHANGE", "sometimes");
        assert!(EngineConfig::from_env().is_err());
    }
}
