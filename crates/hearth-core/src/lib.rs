// hearth-core: client-side state synchronization engine for the Hearth hub.
//
// Maintains a locally cached mirror of the hub's (and its attached
// sub-devices') state, kept consistent via bulk fetches plus a long-poll
// event-notification channel. Locally-initiated mutations can register an
// "expectation" so the resulting server event is recognized as self-caused.

pub mod config;
pub mod engine;
pub mod error;
pub mod expect;
pub mod listen;
pub mod mirror;
pub mod model;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{AccessLevel, EngineConfig};
pub use engine::Engine;
pub use error::CoreError;
pub use expect::ExpectationRegistry;
pub use listen::{ListenState, ListenStatus};
pub use mirror::Mirror;
pub use model::{Device, Event, EventKind, Port};

// Re-exported so consumers can build configs and calls without depending on
// hearth-api directly.
pub use hearth_api::{Method, TlsMode};
