//! Environment driven configuration.
//!
//! | Variable | Used by | Meaning |
//! |---|---|---|
//! | `BROKER_ADDR` | clients | connect over TCP to this address instead of the Unix socket |
//! | `BROKER_SOCKET` | clients, broker | Unix socket path (default [`DEFAULT_UNIX_PATH`]) |
//! | `BROKER_LISTEN` | broker | TCP bind address (default [`DEFAULT_TCP_ADDR`], `off` disables) |
//! | `IPC_PREFIX` | proxies, bindings | channel prefix (default `ipc`) |
//! | `IPC_CALL_TIMEOUT_MS` | proxies | fail calls that take longer than this |

use std::{fmt, time::Duration};
#[cfg(unix)]
use std::path::PathBuf;

use crate::channel::ChannelPrefix;

pub const DEFAULT_TCP_ADDR: &str = "127.0.0.1:5000";
#[cfg(unix)]
pub const DEFAULT_UNIX_PATH: &str = "/tmp/ipc_proxy.sock";

pub const ENV_BROKER_ADDR: &str = "BROKER_ADDR";
pub const ENV_BROKER_SOCKET: &str = "BROKER_SOCKET";
pub const ENV_BROKER_LISTEN: &str = "BROKER_LISTEN";
pub const ENV_PREFIX: &str = "IPC_PREFIX";
pub const ENV_CALL_TIMEOUT: &str = "IPC_CALL_TIMEOUT_MS";

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Where a client finds the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(String),
    #[cfg(unix)]
    Unix(PathBuf),
}

impl Endpoint {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(addr) = lookup(ENV_BROKER_ADDR) {
            return Endpoint::Tcp(addr);
        }

        #[cfg(unix)]
        {
            let path =
                lookup(ENV_BROKER_SOCKET).unwrap_or_else(|| DEFAULT_UNIX_PATH.to_string());
            Endpoint::Unix(PathBuf::from(path))
        }

        #[cfg(not(unix))]
        {
            Endpoint::Tcp(DEFAULT_TCP_ADDR.to_string())
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            #[cfg(unix)]
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Listening sockets of the broker. `None` disables a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub tcp_addr: Option<String>,
    #[cfg(unix)]
    pub unix_path: Option<PathBuf>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            tcp_addr: Some(DEFAULT_TCP_ADDR.to_string()),
            #[cfg(unix)]
            unix_path: Some(PathBuf::from(DEFAULT_UNIX_PATH)),
        }
    }
}

impl BrokerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        match lookup(ENV_BROKER_LISTEN).as_deref() {
            Some("off") => config.tcp_addr = None,
            Some(addr) => config.tcp_addr = Some(addr.to_string()),
            None => {}
        }
        #[cfg(unix)]
        {
            match lookup(ENV_BROKER_SOCKET).as_deref() {
                Some("off") => config.unix_path = None,
                Some(path) => config.unix_path = Some(PathBuf::from(path)),
                None => {}
            }
        }
        config
    }

    /// TCP only, on an ephemeral local port.
    pub fn local_tcp() -> Self {
        Self {
            tcp_addr: Some("127.0.0.1:0".to_string()),
            #[cfg(unix)]
            unix_path: None,
        }
    }
}

/// Settings shared by the binder and the proxy of one contract registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyConfig {
    pub prefix: ChannelPrefix,
    /// `None` waits for a response indefinitely.
    pub call_timeout: Option<Duration>,
}

impl ProxyConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let prefix = lookup(ENV_PREFIX).map(ChannelPrefix::new).unwrap_or_default();
        let call_timeout = lookup(ENV_CALL_TIMEOUT).and_then(|raw| match raw.parse::<u64>() {
            Ok(ms) => Some(Duration::from_millis(ms)),
            Err(e) => {
                log::warn!("Ignoring {ENV_CALL_TIMEOUT}={raw}: {e}");
                None
            }
        });
        Self {
            prefix,
            call_timeout,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<ChannelPrefix>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }
}
