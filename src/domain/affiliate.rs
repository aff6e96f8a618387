//! Affiliate accounts. Provisioning lives elsewhere; ingestion only
//! resolves API keys to owners.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Affiliate {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub created_at: DateTime<Utc>,
}
