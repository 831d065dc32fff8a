// ── Core error types ──
//
// User-facing errors from hearth-core. Consumers never see raw reqwest
// errors or JSON parse failures directly; the `From<hearth_api::Error>`
// impl translates transport-layer errors into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Request timed out")]
    Timeout,

    #[error("Hub is not reachable")]
    Disconnected,

    // ── Hub-reported errors ──────────────────────────────────────────
    #[error("{message}")]
    AccessDenied { message: String },

    #[error("{message}")]
    NotFound { code: String, message: String },

    #[error("{message}")]
    Validation { code: String, message: String },

    /// Any other classified hub error (busy, offline, device-error, ...).
    #[error("{message}")]
    Api {
        code: String,
        status: u16,
        message: String,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<hearth_api::Error> for CoreError {
    fn from(err: hearth_api::Error) -> Self {
        match err {
            hearth_api::Error::Timeout => CoreError::Timeout,
            hearth_api::Error::Disconnected => CoreError::Disconnected,
            hearth_api::Error::Api(f) => match f.http_status {
                403 => CoreError::AccessDenied { message: f.message },
                404 => CoreError::NotFound {
                    code: f.code,
                    message: f.message,
                },
                400 => CoreError::Validation {
                    code: f.code,
                    message: f.message,
                },
                status => CoreError::Api {
                    code: f.code,
                    status,
                    message: f.message,
                },
            },
            hearth_api::Error::Transport(e) => CoreError::Internal(e.to_string()),
            hearth_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            hearth_api::Error::Tls(msg) => CoreError::Config {
                message: format!("TLS error: {msg}"),
            },
            hearth_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}
