// ── Cache mirror & reconciliation ──
//
// Authoritative local copies of hub state, repaired against fresh
// snapshots by synthesizing the same event shapes the notification
// channel would have delivered.

mod cache;
mod reconcile;

pub use cache::Mirror;
