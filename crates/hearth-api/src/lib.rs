// hearth-api: raw HTTP transport for the Hearth hub's REST + long-poll API.

pub mod client;
pub mod error;
pub mod token;
pub mod transport;

pub use client::{HttpClient, WireEvent};
pub use error::{ApiFailure, Error};
pub use transport::{TlsMode, TransportConfig};

/// Re-exported so consumers don't need a direct reqwest dependency.
pub use reqwest::Method;
