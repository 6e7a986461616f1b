//! Node and manager configuration.
//!
//! [`NodeOptions`] describes one backend endpoint and [`ManagerOptions`] the
//! client identity shared by every node. Both deserialize from the TOML
//! configuration file read by the binary, with durations in milliseconds.
//!
//! # Example
//!
//! ```toml
//! [manager]
//! client_id = "123456789012345678"
//!
//! [[nodes]]
//! host = "localhost"
//! password = "youshallnotpass"
//! retry_delay = 5000
//! ```

use std::time::Duration;

use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds};
use veil::Redact;

use crate::error::{Error, Result};

/// Options for a single backend node.
///
/// Use [`NodeOptions::new`] for the defaults and [`NodeOptions::validate`]
/// before handing the options to a manager. The shared secret is redacted
/// from `Debug` output.
#[serde_as]
#[derive(Clone, Deserialize, Redact)]
#[serde(default, deny_unknown_fields)]
pub struct NodeOptions {
    /// Host name or address of the node.
    pub host: String,

    /// Port of the node. Forced to 443 when `secure` is set.
    pub port: u16,

    /// Shared secret sent as `Authorization` on every request.
    #[redact]
    pub password: String,

    /// Whether to use `wss` and `https`.
    pub secure: bool,

    /// Unique key of the node within its manager. Defaults to `host`.
    pub identifier: Option<String>,

    /// Connection attempts before the node gives up and destroys itself.
    pub retry_amount: u32,

    /// Fixed delay between connection attempts.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub retry_delay: Duration,

    /// Timeout of a single REST request.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub request_timeout: Duration,

    /// Protocol version tag, such as `v4`.
    pub version: Option<String>,

    /// Whether to prefix REST and websocket paths with the version tag.
    pub use_version_path: bool,

    /// Voice regions this node prefers to serve.
    pub regions: Vec<String>,

    /// Options of the HTTP connection pool.
    pub pool: PoolOptions,
}

/// Options passed through to the HTTP connection pool.
#[serde_as]
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PoolOptions {
    /// Maximum idle connections kept per host.
    pub max_idle_per_host: Option<usize>,

    /// How long an idle connection is kept open.
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub idle_timeout: Option<Duration>,
}

impl NodeOptions {
    /// Default port of the backend.
    pub const DEFAULT_PORT: u16 = 2333;

    /// Port used when `secure` is set.
    pub const SECURE_PORT: u16 = 443;

    /// Default shared secret of the backend.
    pub const DEFAULT_PASSWORD: &'static str = "youshallnotpass";

    /// Default number of connection attempts.
    pub const DEFAULT_RETRY_AMOUNT: u32 = 5;

    /// Default delay between connection attempts.
    pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);

    /// Default REST request timeout.
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    /// Default protocol version tag.
    pub const DEFAULT_VERSION: &'static str = "v4";

    /// Creates options for `host` with all other fields at their defaults.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Checks the options and applies the normalizations that depend on
    /// other fields.
    ///
    /// After validation the port is 443 if `secure` is set, the identifier
    /// is filled in from the host and regions are lowercase.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if:
    /// * `host` is empty
    /// * `password` is empty
    /// * `identifier` is given but empty
    /// * `retry_amount` is zero
    pub fn validate(mut self) -> Result<Self> {
        if self.host.trim().is_empty() {
            return Err(Error::invalid_argument(
                "node option `host` must be present and be a non-empty string",
            ));
        }

        if self.password.is_empty() {
            return Err(Error::invalid_argument(
                "node option `password` must be a non-empty string",
            ));
        }

        match self.identifier {
            Some(ref identifier) if identifier.is_empty() => {
                return Err(Error::invalid_argument(
                    "node option `identifier` must be a non-empty string",
                ));
            }
            Some(_) => {}
            None => self.identifier = Some(self.host.clone()),
        }

        if self.retry_amount == 0 {
            return Err(Error::invalid_argument(
                "node option `retry_amount` must be at least 1",
            ));
        }

        if self.secure {
            self.port = Self::SECURE_PORT;
        }

        for region in &mut self.regions {
            *region = region.to_lowercase();
        }

        Ok(self)
    }

    /// The key of this node within its manager.
    #[must_use]
    pub fn identifier(&self) -> &str {
        self.identifier.as_deref().unwrap_or(&self.host)
    }

    /// The version path prefix, if enabled and configured.
    #[must_use]
    pub fn version_path(&self) -> Option<&str> {
        if self.use_version_path {
            self.version.as_deref().filter(|version| !version.is_empty())
        } else {
            None
        }
    }
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: Self::DEFAULT_PORT,
            password: Self::DEFAULT_PASSWORD.to_owned(),
            secure: false,
            identifier: None,
            retry_amount: Self::DEFAULT_RETRY_AMOUNT,
            retry_delay: Self::DEFAULT_RETRY_DELAY,
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
            version: Some(Self::DEFAULT_VERSION.to_owned()),
            use_version_path: true,
            regions: Vec::new(),
            pool: PoolOptions::default(),
        }
    }
}

/// Options shared by every node of a manager.
#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ManagerOptions {
    /// Number of shards of the bot, sent as `Num-Shards`.
    pub shards: u32,

    /// User id of the bot, sent as `User-Id`.
    pub client_id: String,

    /// Client name, sent as `Client-Name`.
    pub client_name: String,

    /// Whether to start the next track when one ends.
    pub auto_play: bool,

    /// Default interval at which player positions are advanced locally.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub position_update_interval: Duration,
}

impl ManagerOptions {
    /// Default interval of the local position clock.
    pub const DEFAULT_POSITION_UPDATE_INTERVAL: Duration = Duration::from_millis(250);

    /// Creates options for the bot with user id `client_id`.
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    /// Checks the options.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `client_id` or `client_name` are empty,
    /// or `shards` is zero.
    pub fn validate(self) -> Result<Self> {
        if self.client_id.is_empty() {
            return Err(Error::invalid_argument(
                "manager option `client_id` must be a non-empty string",
            ));
        }

        if self.client_name.is_empty() {
            return Err(Error::invalid_argument(
                "manager option `client_name` must be a non-empty string",
            ));
        }

        if self.shards == 0 {
            return Err(Error::invalid_argument(
                "manager option `shards` must be at least 1",
            ));
        }

        Ok(self)
    }
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            shards: 1,
            client_id: String::new(),
            client_name: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            auto_play: true,
            position_update_interval: Self::DEFAULT_POSITION_UPDATE_INTERVAL,
        }
    }
}

/// Contents of the configuration file read by the binary.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub manager: ManagerOptions,

    #[serde(default)]
    pub nodes: Vec<NodeOptions>,
}

impl Config {
    /// Parses a configuration file.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `s` is not valid TOML or does not match
    /// the expected layout.
    pub fn from_toml(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(Into::into)
    }
}
