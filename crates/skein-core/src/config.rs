use std::time::Duration;

use crate::ConfigError;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_PENDING: usize = 8192;

/// Client-side transport settings.
///
/// Immutable once built; [`ClientConfig::new`] validates every field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    connect_timeout: Duration,
    max_pending: usize,
}

impl ClientConfig {
    pub fn new(connect_timeout: Duration, max_pending: usize) -> Result<Self, ConfigError> {
        if connect_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("connect_timeout"));
        }
        if max_pending == 0 {
            return Err(ConfigError::ZeroMaxPending);
        }
        Ok(Self {
            connect_timeout,
            max_pending,
        })
    }

    /// Defaults, overridden by `SKEIN_CONNECT_TIMEOUT_MS` and
    /// `SKEIN_MAX_PENDING` when they hold positive integers.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let positive = |name: &str| {
            var(name)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|v| *v > 0)
        };
        let connect_timeout = positive("SKEIN_CONNECT_TIMEOUT_MS")
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let max_pending = positive("SKEIN_MAX_PENDING")
            .and_then(|v| usize::try_from(v).ok())
            .unwrap_or(DEFAULT_MAX_PENDING);
        Self {
            connect_timeout,
            max_pending,
        }
    }

    /// Upper bound on a single connect attempt.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Maximum number of in-flight calls per session.
    pub fn max_pending(&self) -> usize {
        self.max_pending
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_values() {
        assert_eq!(
            ClientConfig::new(Duration::ZERO, 1),
            Err(ConfigError::ZeroTimeout("connect_timeout"))
        );
        assert_eq!(
            ClientConfig::new(Duration::from_secs(1), 0),
            Err(ConfigError::ZeroMaxPending)
        );
    }

    #[test]
    fn accepts_valid_values() {
        let config = ClientConfig::new(Duration::from_millis(250), 16).unwrap();
        assert_eq!(config.connect_timeout(), Duration::from_millis(250));
        assert_eq!(config.max_pending(), 16);
    }

    fn vars(pairs: &[(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        let pairs = pairs.to_vec();
        move |name| {
            pairs
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
        }
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = ClientConfig::from_vars(vars(&[
            ("SKEIN_CONNECT_TIMEOUT_MS", "750"),
            ("SKEIN_MAX_PENDING", "32"),
        ]));
        assert_eq!(config.connect_timeout(), Duration::from_millis(750));
        assert_eq!(config.max_pending(), 32);
    }

    #[test]
    fn zero_or_garbage_environment_values_are_ignored() {
        for (timeout, max) in [("0", "0"), ("soon", "-3"), ("", "lots")] {
            let config = ClientConfig::from_vars(vars(&[
                ("SKEIN_CONNECT_TIMEOUT_MS", timeout),
                ("SKEIN_MAX_PENDING", max),
            ]));
            assert_eq!(config, ClientConfig::default(), "{timeout:?} {max:?}");
        }
        assert_eq!(ClientConfig::from_vars(|_| None), ClientConfig::default());
    }
}
