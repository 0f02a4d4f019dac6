//! Authentication session state for client applications.
//!
//! ARCHITECTURE
//! ============
//! `provider` adapts an external identity service behind the
//! `IdentityProvider` trait. `services::session` keeps the one session record
//! and notifies subscribers on every transition. `context` wires the two
//! together from environment configuration.

pub mod context;
pub mod provider;
pub mod services;
pub mod state;

pub use context::AuthContext;
pub use provider::{AuthError, IdentityProvider};
pub use state::{SessionRecord, SessionStatus, SessionUser};
