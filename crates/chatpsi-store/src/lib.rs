//! # chatpsi-store
//!
//! Durable storage for the ChatPsi gateway, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for the message log
//! (keyed by thread, soft-delete aware), user profiles (which carry the
//! subscription entitlement) and the outbound webhook audit trail.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod profiles;
pub mod webhook_events;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
