//! Webhook ingest for foreman.
//!
//! Two endpoints (`/api/webhooks/github`, `/api/webhooks/plane`) verify
//! raw-body HMAC-SHA256 signatures, normalize provider payloads into
//! [`foreman_models::TriggerEvent`]s, and dispatch: issue comments go to
//! the plan-gate resume path, everything else to the trigger engine and,
//! on a positive decision, the session manager's spawn.
//!
//! Response contract: 401 only for signature failure, 400 only for
//! unparseable JSON, 200 for everything else. "No trigger matched" and
//! "spawn failed" are logged and answered 200 so the provider does not
//! retry-storm us.

pub mod handlers;
pub mod normalize;
pub mod resume;
pub mod router;
pub mod signature;
pub mod state;

pub use router::{create_router, serve};
pub use state::AppState;
