//! # mimic-domain
//!
//! Pure domain model for the mimic presence simulator.
//!
//! ## Responsibilities
//! - Foundational types: tracking keys, error conventions, timestamps
//! - Define **Events** (recorded on/off transitions with their calendar position)
//! - Define **Histories** (bounded, deduplicated per-key event sequences)
//! - Define **Replay modes** and the next-event calculation on the weekly/hourly ring
//! - Contain all invariant enforcement (dedup, retention, size cap)
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod time;
pub mod tracking_key;

pub mod device;
pub mod event;
pub mod history;
pub mod schedule;
