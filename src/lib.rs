//! Leadgate
//!
//! Lead management and dropshipping back office for affiliate networks.
//!
//! ## Features
//! - Authenticated lead submission with catalog, price and stock enforcement
//! - Argentine phone normalization with mobile-type classification
//! - Same-day duplicate detection backed by a partial unique index
//! - Partner platform order import with idempotent replay
//! - Tiered payout resolution on conversion
//! - Templated postback dispatch with outcome logging

pub mod clock;
pub mod config;
pub mod diag;
pub mod domain;
pub mod error;
pub mod http;
pub mod payout;
pub mod pipeline;
pub mod postback;
pub mod state;
pub mod store;
