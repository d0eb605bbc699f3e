//! Core data types for foreman.
//!
//! This crate holds the entities shared by every other foreman crate:
//! - [`Session`] and its [`SessionStatus`] state machine
//! - [`PrpPhase`] for the structured-methodology lifecycle
//! - normalized [`TriggerEvent`]s produced by webhook ingest
//! - [`EventKind`] classification of status transitions
//! - [`NotifyEvent`] and [`Priority`] for human notifications

pub mod event;
pub mod notify;
pub mod session;
pub mod status;

pub use event::{IssueRef, TriggerEvent, TriggerEventKind};
pub use notify::{NotifyEvent, Priority};
pub use session::{id_sort_key, is_valid_session_id, Session};
pub use status::{EventKind, PrpPhase, SessionStatus};
