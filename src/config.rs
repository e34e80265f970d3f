//! Engine configuration, fixed at construction.
use std::time::Duration;

use crate::ws::frame::MAX_PAYLOAD_LEN;

/// Configuration shared by [`PoolManager`] and [`Server`].
///
/// ```
/// use std::time::Duration;
///
/// let config = plex::Config::builder()
///     .pool_size(4)
///     .max_connections_per_destination(2)
///     .idle_timeout(Duration::from_secs(30))
///     .build()
///     .unwrap();
/// assert_eq!(config.pool_size, 4);
/// ```
///
/// [`PoolManager`]: crate::client::PoolManager
/// [`Server`]: crate::server::Server
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Maximum simultaneous transport sockets of a pool.
    pub pool_size: usize,
    /// Connections opened to a single destination.
    pub max_connections_per_destination: usize,
    /// Idle timeout of client connections and server sessions.
    pub idle_timeout: Duration,
    /// Capacity of the idle set, the oldest entry is evicted beyond it.
    pub idle_capacity: usize,
    /// Initial receive buffer size.
    pub receive_buffer_size: usize,
    /// Largest accepted message head.
    pub max_header_size: usize,
    /// Default websocket reassembly limit, 0 delivers fragments as they arrive.
    pub max_reassembly: usize,
    /// Largest outgoing websocket frame payload, bigger messages are split.
    pub max_frame_size: usize,
    /// Extra connect attempts before queued requests fail.
    pub connect_retries: u32,
    /// Delay before the first connect retry, doubled for each further attempt.
    pub retry_backoff: Duration,
    /// Maximum concurrent server sessions.
    pub max_sessions: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: 10,
            max_connections_per_destination: 1,
            idle_timeout: Duration::from_secs(10),
            idle_capacity: 20,
            receive_buffer_size: 4096,
            max_header_size: 16 * 1024,
            max_reassembly: 64 * 1024,
            max_frame_size: 4096,
            connect_retries: 0,
            retry_backoff: Duration::from_secs(1),
            max_sessions: 1024,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder { config: Config::default() }
    }

    /// Check every limit, see [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("pool_size", self.pool_size),
            ("max_connections_per_destination", self.max_connections_per_destination),
            ("idle_capacity", self.idle_capacity),
            ("receive_buffer_size", self.receive_buffer_size),
            ("max_header_size", self.max_header_size),
            ("max_sessions", self.max_sessions),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero(name));
        }
        if self.max_frame_size == 0 || self.max_frame_size as u64 > MAX_PAYLOAD_LEN {
            return Err(ConfigError::FrameSize(self.max_frame_size));
        }
        Ok(())
    }

    /// Delay before connect attempt number `attempt`, starting at 1.
    pub(crate) fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.retry_backoff.saturating_mul(factor)
    }
}

/// Invalid [`Config`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("`{0}` must be greater than zero")]
    Zero(&'static str),
    #[error("max frame size {0} is outside 1..=0x7FFFFFFF")]
    FrameSize(usize),
}

/// Builder for [`Config`].
#[derive(Clone, Debug)]
pub struct ConfigBuilder {
    config: Config,
}

macro_rules! setters {
    ($($(#[$doc:meta])* $name:ident: $ty:ty;)*) => {
        impl ConfigBuilder {
            $(
                $(#[$doc])*
                pub fn $name(mut self, $name: $ty) -> Self {
                    self.config.$name = $name;
                    self
                }
            )*
        }
    };
}

setters! {
    pool_size: usize;
    max_connections_per_destination: usize;
    idle_timeout: Duration;
    idle_capacity: usize;
    receive_buffer_size: usize;
    max_header_size: usize;
    /// 0 disables automatic reassembly.
    max_reassembly: usize;
    max_frame_size: usize;
    connect_retries: u32;
    retry_backoff: Duration;
    max_sessions: usize;
}

impl ConfigBuilder {
    pub fn build(self) -> Result<Config, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
