//! Lifelist — a REST backend for a personal bird life list.
//!
//! Users register and log in, receive a signed time-limited bearer token,
//! and manage their own sighting records. An uploaded photo can be sent to
//! an external image-classification service for a species suggestion; that
//! call is advisory only and never touches the store.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod identify;
pub mod sightings;
