//! # mimic-app
//!
//! Application layer — the replay loop and its **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement (driven/outbound ports):
//!   - `CapabilityIo` — read, write and subscribe to on/off capabilities
//!   - `KeyValueStore` — durable blobs for histories and global flags
//!   - `Clock` — local wall-clock time
//! - Implement the four coupled pieces of the replay loop:
//!   - `tracking` — push subscription with polling fallback
//!   - `history_store` — bounded, deduplicated, per-key persisted histories
//!   - `schedule_engine` — one live timer per key, self-rescheduling
//!   - `initial_sync` — one-shot corrective pass when replay is armed
//! - Own all of that state in a single scheduler task (`scheduler`), driven
//!   through a cloneable `SchedulerHandle`
//!
//! ## Dependency rule
//! Depends on `mimic-domain` only (plus `tokio` for tasks, channels and timers).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod history_store;
pub mod initial_sync;
pub mod ports;
pub mod schedule_engine;
pub mod scheduler;
pub mod tracking;

#[cfg(test)]
pub(crate) mod test_support;
