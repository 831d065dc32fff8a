// Runtime connection configuration.
//
// These types describe *how* to connect to a hub. They carry credential
// data and loop tuning, but never touch disk -- the surrounding application
// constructs an `EngineConfig` and hands it in.

use std::time::Duration;

use hearth_api::TlsMode;
use secrecy::SecretString;
use url::Url;

/// Access level of the signed-in account.
///
/// Gates which collections `load` fetches; the hub reports the same three
/// levels in `403` responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccessLevel {
    User,
    Admin,
    Installer,
}

/// Configuration for connecting to a single hub.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hub URL (e.g., `http://192.168.1.50`).
    pub url: Url,
    /// Account username; the password is hashed before any call is made.
    pub username: String,
    pub password: SecretString,
    /// TLS verification strategy.
    pub tls: TlsMode,
    /// Default request timeout.
    pub timeout: Duration,
    /// Server-side hold time for a normal long poll.
    pub keepalive: Duration,
    /// Reconnect delay once the fast-retry window is exhausted.
    pub retry_interval: Duration,
    /// Delay between attempts of an indefinitely-retried `load`.
    pub load_retry: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: "http://192.168.1.50".parse().expect("static URL parses"),
            username: "admin".into(),
            password: SecretString::from(String::new()),
            tls: TlsMode::DangerAcceptInvalid,
            timeout: Duration::from_secs(30),
            keepalive: Duration::from_secs(60),
            retry_interval: Duration::from_secs(30),
            load_retry: Duration::from_secs(5),
        }
    }
}
