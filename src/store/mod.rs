//! Persistence seam.
//!
//! The pipeline talks to storage through these traits so the ingestion
//! logic can be exercised against an in-memory double. `PgStore` is the
//! production implementation.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{
    Affiliate, Lead, LeadItem, LeadStatus, NewLead, NewPostbackConfig, NewPostbackNotification,
    PostbackConfig, PostbackNotification, Product,
};

#[cfg(any(test, feature = "mock"))]
pub mod memory;
pub mod postgres;

#[cfg(any(test, feature = "mock"))]
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The partial unique index on (formatted_phone, dup_day) fired:
    /// another live lead claimed the phone between the duplicate check
    /// and the insert.
    #[error("phone {phone} already held by a live lead on {day}")]
    DuplicatePhone { phone: String, day: NaiveDate },

    #[error("insufficient stock for {sku}: requested {requested}")]
    OutOfStock { sku: String, requested: i32 },

    #[error("{what} not found")]
    NotFound { what: &'static str },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait AffiliateStore: Send + Sync {
    async fn affiliate_by_api_key(&self, api_key: &str) -> Result<Option<Affiliate>>;
}

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn product_by_id(&self, id: i64) -> Result<Option<Product>>;
    async fn product_by_sku(&self, sku: &str) -> Result<Option<Product>>;
}

#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Earliest-created lead on `day` in `hold` or `sale` whose stored
    /// phone (formatted or original) matches any of `candidates`.
    /// Duplicate scope is global across affiliates.
    async fn same_day_conflict(
        &self,
        day: NaiveDate,
        candidates: &[String],
        exclude_lead_number: Option<&str>,
    ) -> Result<Option<Lead>>;

    /// Inserts the lead, its item snapshots, and the stock decrements
    /// as one transaction. A failed decrement rolls everything back.
    async fn create_lead(&self, new: &NewLead) -> Result<Lead>;

    async fn lead_by_number(&self, user_id: i64, lead_number: &str) -> Result<Option<Lead>>;

    /// Matches an imported lead by the partner platform's order id.
    async fn lead_by_source_ref(&self, user_id: i64, source_ref: &str) -> Result<Option<Lead>>;

    /// Writes the new status, stamping payout and note when supplied.
    /// Errors with `NotFound` if the row is gone.
    async fn update_lead_status(
        &self,
        id: Uuid,
        status: LeadStatus,
        payout: Option<Decimal>,
        note: Option<&str>,
    ) -> Result<Lead>;

    async fn items_for_lead(&self, lead_id: Uuid) -> Result<Vec<LeadItem>>;
}

#[async_trait]
pub trait PayoutStore: Send + Sync {
    async fn publisher_override(
        &self,
        user_id: i64,
        product_id: i64,
        publisher_id: &str,
    ) -> Result<Option<Decimal>>;

    async fn affiliate_override(&self, user_id: i64, product_id: i64) -> Result<Option<Decimal>>;
}

#[async_trait]
pub trait PostbackStore: Send + Sync {
    async fn postback_config(&self, user_id: i64) -> Result<Option<PostbackConfig>>;

    async fn upsert_postback_config(
        &self,
        user_id: i64,
        config: &NewPostbackConfig,
    ) -> Result<PostbackConfig>;

    async fn record_notification(
        &self,
        entry: &NewPostbackNotification,
    ) -> Result<PostbackNotification>;
}

/// Everything the service needs from storage, as one object-safe bound.
pub trait Store:
    AffiliateStore + ProductCatalog + LeadStore + PayoutStore + PostbackStore
{
}

impl<T> Store for T where
    T: AffiliateStore + ProductCatalog + LeadStore + PayoutStore + PostbackStore
{
}
