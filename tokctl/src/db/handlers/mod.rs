//! Repository implementations for database access.
//!
//! [`repository`] defines one trait per store. This module provides the Postgres
//! implementations; each wraps a [`sqlx::PgPool`] and opens its own transaction where a
//! write touches more than one row.
//!
//! # Available Repositories
//!
//! - [`PgPricingCatalog`]: Per-token model prices
//! - [`PgDiscountSlabs`]: The base-discount slab and its levels
//! - [`PgCoupons`] / [`PgOffers`]: Promotions and offer redemptions
//! - [`PgAgentAccounts`]: Agent token balances and the allotment transaction
//! - [`PgOrderLedger`]: Per-user order ledger
//!
//! ```ignore
//! use tokctl::db::handlers::Repositories;
//!
//! let repos = Repositories::postgres(pool);
//! let model = repos.pricing.get_model("gpt-4").await?;
//! ```

pub mod agents;
pub mod discounts;
pub mod orders;
pub mod pricing;
pub mod promotions;
pub mod repository;

pub use agents::PgAgentAccounts;
pub use discounts::PgDiscountSlabs;
pub use orders::PgOrderLedger;
pub use pricing::PgPricingCatalog;
pub use promotions::{PgCoupons, PgOffers};
pub use repository::{AgentAccounts, Coupons, DiscountSlabs, Offers, OrderLedger, PricingCatalog, Repositories};
