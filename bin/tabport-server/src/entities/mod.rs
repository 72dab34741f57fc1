//! Durable task persistence.
//!
//! [`SqliteStore`] implements [`tabport_core::TaskStore`] on top of `sqlx`.
//! To move to another database, implement the same trait for a new type and
//! change the concrete store in [`crate::state`].

pub mod task;

pub use task::SqliteStore;
