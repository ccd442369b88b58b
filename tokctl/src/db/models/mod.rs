//! Database record models matching table schemas.
//!
//! These models are used by repositories to return query results and accept
//! insertion/update data. They are kept distinct from the API models in
//! [`crate::api::models`] so storage and wire representations can evolve separately.
//!
//! - [`agents`]: Agent token accounts, per-model balances and the `using_model` mirror
//! - [`discounts`]: The platform-wide base-discount slab
//! - [`orders`]: Per-user purchase ledger
//! - [`pricing`]: Per-model token prices
//! - [`promotions`]: User coupons and global offers

pub mod agents;
pub mod discounts;
pub mod orders;
pub mod pricing;
pub mod promotions;
