//! The trigger engine.
//!
//! Evaluates normalized tracker events against project trigger rules and
//! decides whether to spawn a session. Evaluation is a pure function over
//! `(event, config, current sessions)`: it never errors on malformed
//! events, it just declines. Idempotency comes from two layers: a bounded
//! in-memory delivery-id window, and a duplicate-session guard over the
//! live session list (the latter is the actual invariant; the former only
//! damps provider retry storms).

pub mod dedup;
pub mod engine;

pub use dedup::DeliveryDedup;
pub use engine::{SpawnDecision, TriggerEngine};
