//! API request and response data models.
//!
//! Kept separate from the database models so the wire format can stay stable while
//! storage evolves. Field names are camelCase, except the gateway identifiers in
//! [`orders::ConfirmPaymentRequest`] which use the gateway's own names. Money is sent as
//! JSON numbers with two decimal places (four for per-token prices).
//!
//! - [`users`]: the authenticated principal
//! - [`orders`]: purchase requests, billing views and the order ledger
//! - [`agents`]: agent token balances
//! - [`admin`]: discount slab and manual allotment payloads

pub mod admin;
pub mod agents;
pub mod orders;
pub mod users;
