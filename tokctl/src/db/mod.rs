//! Data access layer.
//!
//! ```text
//! ┌──────────────┐
//! │ Flows / API  │  (checkout, allotment, api::handlers)
//! └──────┬───────┘
//!        ↓
//! ┌──────────────┐
//! │ Repositories │  (db::handlers traits, Postgres or in-memory)
//! └──────┬───────┘
//!        ↓
//! ┌──────────────┐
//! │   Models     │  (db::models)
//! └──────────────┘
//! ```
//!
//! # Modules
//!
//! - [`handlers`]: Repository traits and their Postgres implementations
//! - [`memory`]: In-process implementation of the same traits
//! - [`models`]: Records shared by both backends
//! - [`errors`]: Database-specific error types
//!
//! # Migrations
//!
//! Postgres migrations live in `migrations/` and are applied at start-up through
//! [`crate::migrator`].

pub mod errors;
pub mod handlers;
pub mod memory;
pub mod models;
