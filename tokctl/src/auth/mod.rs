//! Authentication for customer and admin routes.
//!
//! Sessions are issued by the platform's login service as HS256 JWTs signed with the
//! shared `secret_key`. This service only verifies them.
//!
//! A token is accepted from either place, header first:
//!
//! - `Authorization: Bearer <jwt>`
//! - the session cookie named by `auth.session.cookie_name`
//!
//! # Usage in Handlers
//!
//! ```ignore
//! use tokctl::api::models::users::CurrentUser;
//!
//! async fn handler(current_user: CurrentUser) -> String {
//!     format!("Hello, {}!", current_user.username)
//! }
//! ```
//!
//! Admin-only handlers take [`current_user::AdminUser`] instead, which rejects
//! non-admins with 403.

pub mod current_user;
pub mod session;
