use std::fmt;
use std::str::FromStr;

use crate::ConfigError;

/// A remote transport endpoint. Used as the connection cache key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    host: String,
    port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Address {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::InvalidAddress(s.to_string()))?;
        if host.is_empty() {
            return Err(ConfigError::InvalidAddress(s.to_string()));
        }
        let port = port
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(s.to_string()))?;
        Ok(Address::new(host, port))
    }
}
