//! HTTP request handlers, grouped by resource.
//!
//! - [`payments`]: purchase verification, order creation, payment confirmation and the
//!   gateway webhook
//! - [`agents`]: an agent owner's token balances
//! - [`admin`]: discount slab management and manual allotments
//!
//! Handlers authenticate through the [`crate::api::models::users::CurrentUser`] and
//! [`crate::auth::current_user::AdminUser`] extractors and return [`crate::errors::Error`],
//! which renders as `{"success": false, "error": ...}`.

pub mod admin;
pub mod agents;
pub mod payments;
