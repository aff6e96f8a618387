//! Lead and line-item records.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a lead. Every lead is created in `Hold`; operators or
/// the source system move it to exactly one of the other states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum LeadStatus {
    Hold,
    Sale,
    Rejected,
    Trash,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hold => "hold",
            Self::Sale => "sale",
            Self::Rejected => "rejected",
            Self::Trash => "trash",
        }
    }

    /// Only holds move; terminal states are frozen as far as this core
    /// is concerned.
    pub fn can_transition_to(&self, next: LeadStatus) -> bool {
        matches!(
            (self, next),
            (Self::Hold, Self::Sale) | (Self::Hold, Self::Rejected) | (Self::Hold, Self::Trash)
        )
    }
}

impl std::fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which channel created the lead. Drives the lead-number prefix and the
/// per-channel duplicate policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum LeadSource {
    Api,
    Import,
}

impl LeadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Import => "import",
        }
    }

    fn number_prefix(&self) -> &'static str {
        match self {
            Self::Api => "L",
            Self::Import => "W",
        }
    }
}

/// Human-readable, globally unique lead number: prefix + submission
/// epoch millis + owning affiliate id.
pub fn lead_number(source: LeadSource, at: DateTime<Utc>, owner_id: i64) -> String {
    format!("{}{}{}", source.number_prefix(), at.timestamp_millis(), owner_id)
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Lead {
    pub id: Uuid,
    pub lead_number: String,
    pub user_id: i64,
    pub product_id: i64,
    pub campaign_id: Option<i64>,
    pub customer_name: String,
    pub customer_email: Option<String>,
    /// Phone exactly as submitted; kept for audit and cross-matching.
    pub customer_phone: String,
    /// Canonical area-code-qualified form; NULL when normalization failed.
    pub formatted_phone: Option<String>,
    pub customer_address: String,
    pub customer_city: String,
    pub customer_postal_code: String,
    pub customer_province: Option<String>,
    pub country: String,
    pub value: Decimal,
    pub payout: Option<Decimal>,
    pub status: LeadStatus,
    pub publisher_id: Option<String>,
    pub subacc1: Option<String>,
    pub subacc2: Option<String>,
    pub subacc3: Option<String>,
    pub subacc4: Option<String>,
    pub click_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub custom_fields: Option<serde_json::Value>,
    pub source: LeadSource,
    pub source_ref: Option<String>,
    pub note: Option<String>,
    pub dup_day: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct LeadItem {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub product_name: String,
    pub sku: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

/// Everything the store needs to persist an accepted (or trashed)
/// submission in one transaction.
#[derive(Clone, Debug)]
pub struct NewLead {
    pub lead_number: String,
    pub user_id: i64,
    pub product_id: i64,
    pub campaign_id: Option<i64>,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub customer_phone: String,
    pub formatted_phone: Option<String>,
    pub customer_address: String,
    pub customer_city: String,
    pub customer_postal_code: String,
    pub customer_province: Option<String>,
    pub country: String,
    pub value: Decimal,
    pub payout: Option<Decimal>,
    pub status: LeadStatus,
    pub publisher_id: Option<String>,
    pub subacc1: Option<String>,
    pub subacc2: Option<String>,
    pub subacc3: Option<String>,
    pub subacc4: Option<String>,
    pub click_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub custom_fields: Option<serde_json::Value>,
    pub source: LeadSource,
    pub source_ref: Option<String>,
    pub note: Option<String>,
    pub dup_day: NaiveDate,
    pub items: Vec<NewLeadItem>,
    /// Trash-with-note imports keep the catalog untouched.
    pub decrement_stock: bool,
}

#[derive(Clone, Debug)]
pub struct NewLeadItem {
    /// Catalog reference for the stock decrement; the stored row keeps
    /// only the snapshot columns.
    pub product_id: i64,
    pub product_name: String,
    pub sku: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn transition_table_only_leaves_hold() {
        assert!(LeadStatus::Hold.can_transition_to(LeadStatus::Sale));
        assert!(LeadStatus::Hold.can_transition_to(LeadStatus::Rejected));
        assert!(LeadStatus::Hold.can_transition_to(LeadStatus::Trash));
        assert!(!LeadStatus::Sale.can_transition_to(LeadStatus::Hold));
        assert!(!LeadStatus::Rejected.can_transition_to(LeadStatus::Sale));
        assert!(!LeadStatus::Trash.can_transition_to(LeadStatus::Rejected));
        assert!(!LeadStatus::Hold.can_transition_to(LeadStatus::Hold));
    }

    #[test]
    fn lead_number_embeds_timestamp_and_owner() {
        let at = Utc.with_ymd_and_hms(2025, 8, 10, 12, 0, 0).unwrap();
        let number = lead_number(LeadSource::Api, at, 42);
        assert_eq!(number, format!("L{}42", at.timestamp_millis()));
        let imported = lead_number(LeadSource::Import, at, 42);
        assert!(imported.starts_with('W'));
    }
}
