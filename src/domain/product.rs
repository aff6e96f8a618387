//! Catalog products. Ingestion reads these and decrements stock; all
//! other mutation happens outside this service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Product {
    pub id: i64,
    pub sku: String,
    pub name: String,
    pub price: Decimal,
    pub stock: i32,
    pub status: String,
    /// Catalog-default payout, the lowest tier of the override hierarchy.
    pub payout: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}
