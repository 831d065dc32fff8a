// ── Domain types ──

mod device;
mod event;
mod port;

pub use device::Device;
pub use event::{Event, EventKind};
pub use port::Port;
