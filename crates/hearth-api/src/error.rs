// Error taxonomy for the hub API.
//
// The hub reports failures as `{"error": "<code string>"}` bodies. The code
// strings are matched against an ordered table of known patterns; the first
// match wins, and an entry's HTTP status (where present) narrows the match.
// Unmatched codes fall back to a generic "unexpected error" class.

use serde::Deserialize;
use thiserror::Error;

/// A classified failure reported by the hub.
///
/// `code` is a stable machine identifier, `message` is the pretty text
/// produced from the matched table entry's template, and `param` carries
/// a value extracted from the raw code (the `X` in `other error: X`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiFailure {
    pub code: String,
    pub http_status: u16,
    pub message: String,
    pub param: Option<String>,
}

/// Top-level error type for the `hearth-api` crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Classified error from the hub (see [`ApiFailure`]).
    #[error("{}", .0.message)]
    Api(ApiFailure),

    /// The request reached no server and timed out (status 0, timeout).
    #[error("Request timed out")]
    Timeout,

    /// The request reached no server at all (status 0, connection failure).
    #[error("Device is not reachable")]
    Disconnected,

    /// Other HTTP transport errors (TLS mid-stream, body read, ...).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// TLS configuration or client construction error.
    #[error("TLS error: {0}")]
    Tls(String),
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Disconnected => true,
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Api(f) => matches!(f.http_status, 502 | 503 | 504),
            _ => false,
        }
    }

    /// The classified failure, if this is a hub-reported error.
    pub fn api_failure(&self) -> Option<&ApiFailure> {
        if let Self::Api(f) = self { Some(f) } else { None }
    }

    /// Map a raw `reqwest::Error` that produced no HTTP response.
    ///
    /// Status 0 is distinguished into timeout vs disconnected by
    /// inspecting the underlying transport message.
    pub(crate) fn from_transport(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Disconnected
        } else {
            Self::Transport(e)
        }
    }
}

// ── Known-error table ────────────────────────────────────────────────

struct KnownError {
    /// HTTP status this entry applies to; `None` matches any status.
    status: Option<u16>,
    /// Prefix the raw code string must start with.
    pattern: &'static str,
    code: &'static str,
    /// Pretty message; `{0}` is replaced with the text after the pattern.
    template: &'static str,
}

/// Ordered: first match wins.
const KNOWN_ERRORS: &[KnownError] = &[
    KnownError {
        status: Some(404),
        pattern: "no such port",
        code: "no-such-port",
        template: "No such port on the device",
    },
    KnownError {
        status: Some(404),
        pattern: "no such slave",
        code: "no-such-slave",
        template: "No such sub-device attached to the hub",
    },
    KnownError {
        status: Some(404),
        pattern: "no such pref",
        code: "no-such-pref",
        template: "No such preference",
    },
    KnownError {
        status: Some(400),
        pattern: "malformed request",
        code: "malformed-request",
        template: "The device could not parse the request",
    },
    KnownError {
        status: Some(400),
        pattern: "missing field",
        code: "missing-field",
        template: "A required field is missing from the request",
    },
    KnownError {
        status: Some(400),
        pattern: "invalid field",
        code: "invalid-field",
        template: "A field in the request has an invalid value",
    },
    KnownError {
        status: Some(400),
        pattern: "not modifiable",
        code: "not-modifiable",
        template: "The value is read-only and cannot be modified",
    },
    KnownError {
        status: Some(503),
        pattern: "busy",
        code: "device-busy",
        template: "The device is busy, try again shortly",
    },
    KnownError {
        status: Some(502),
        pattern: "slave offline",
        code: "slave-offline",
        template: "The sub-device is offline",
    },
    KnownError {
        status: Some(504),
        pattern: "device timeout",
        code: "device-timeout",
        template: "The device did not answer in time",
    },
    KnownError {
        status: Some(401),
        pattern: "unauthorized",
        code: "unauthorized",
        template: "Invalid username or password",
    },
    // Unwraps one level of nesting: "other error: X" carries the inner
    // text into the generic device-error template.
    KnownError {
        status: None,
        pattern: "other error: ",
        code: "device-error",
        template: "Error communicating with device ({0})",
    },
];

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    /// Required access level, present on 403 responses.
    #[serde(default)]
    level: Option<String>,
}

/// Classify a non-success response into an [`Error::Api`].
pub(crate) fn classify(status: u16, body: &str) -> Error {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or(ErrorBody {
        error: None,
        level: None,
    });
    let raw = parsed.error.unwrap_or_else(|| body.trim().to_owned());

    if status == 403 {
        return Error::Api(access_denied(status, parsed.level.as_deref()));
    }

    for entry in KNOWN_ERRORS {
        if entry.status.is_some_and(|s| s != status) {
            continue;
        }
        if let Some(rest) = raw.strip_prefix(entry.pattern) {
            let param = (!rest.is_empty()).then(|| rest.to_owned());
            let message = param.as_ref().map_or_else(
                || entry.template.to_owned(),
                |p| entry.template.replace("{0}", p),
            );
            return Error::Api(ApiFailure {
                code: entry.code.to_owned(),
                http_status: status,
                message,
                param,
            });
        }
    }

    Error::Api(ApiFailure {
        code: "unexpected-error".to_owned(),
        http_status: status,
        message: format!("Unexpected error from device ({raw})"),
        param: Some(raw),
    })
}

/// HTTP 403 carries a required-access-level field; translate it into one
/// of three specific messages.
fn access_denied(status: u16, level: Option<&str>) -> ApiFailure {
    let message = match level {
        Some("user") => "This action requires signing in as a user",
        Some("admin") => "This action requires administrator access",
        Some("installer") => "This action requires installer access",
        _ => "Access denied",
    };
    ApiFailure {
        code: "access-denied".to_owned(),
        http_status: status,
        message: message.to_owned(),
        param: level.map(str::to_owned),
    }
}

// ── Tests ────────────────────────────────────────────────────────────
