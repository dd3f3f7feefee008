//! User identity and bearer credentials.
//!
//! Provides:
//! - Registration with a salted, stretched password hash (iterated SHA-256,
//!   100k rounds + per-user salt) — the plaintext is never stored
//! - Login verification with constant-time hash comparison
//! - Stateless signed bearer tokens (HS256 JWT, fixed TTL)
//!
//! ## Design Decisions
//! - Tokens are pure functions of the claims and the process-wide secret;
//!   there is no server-side session row, so revocation before natural
//!   expiry is impossible. A denylist keyed by token id would be the
//!   upgrade path if that ever becomes a requirement.
//! - Login failures for unknown identities burn a dummy hash so the
//!   not-found path costs the same as a wrong password.

pub mod store;
pub mod token;

pub use store::{NewUser, User, UserStore};
pub use token::{TokenError, TokenKeys};
