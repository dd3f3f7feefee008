//! Owner-scoped sighting records.
//!
//! Every sighting has exactly one owner, set from the authenticated
//! identity at creation and immutable afterwards. Reads and deletes of a
//! specific record re-check ownership on every request; a mismatch is
//! reported to the caller exactly like a missing record so non-owners
//! cannot probe which ids exist.

pub mod store;

pub use store::{NewSighting, Sighting, SightingStore};
