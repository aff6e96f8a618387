//! Domain types: leads and their lifecycle, catalog products, postback
//! configuration and dispatch records, the normalized submission shape
//! shared by both ingestion channels, and lifecycle events.

/// Shipping country assumed when a submission does not name one.
pub const DEFAULT_COUNTRY: &str = "Argentina";

pub mod affiliate;
pub mod events;
pub mod lead;
pub mod postback;
pub mod product;
pub mod submission;

pub use affiliate::Affiliate;
pub use events::LeadEvent;
pub use lead::{lead_number, Lead, LeadItem, LeadSource, LeadStatus, NewLead, NewLeadItem};
pub use postback::{
    NewPostbackConfig, NewPostbackNotification, PostbackConfig, PostbackNotification,
    PostbackOutcome,
};
pub use product::Product;
pub use submission::{Channel, LeadSubmission, SubmittedItem};
