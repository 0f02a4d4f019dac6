//! Application services built on top of an identity provider.
//!
//! ARCHITECTURE
//! ============
//! `session` owns the session record and every credential operation that can
//! change it. `subscription` is the observable primitive the record lives in,
//! kept generic so it has no knowledge of authentication.

pub mod session;
pub mod subscription;
