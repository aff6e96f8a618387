//! The normalized intermediate representation both ingestion channels
//! funnel into. The API handler and the platform webhook handler each
//! map their own payload shape onto `LeadSubmission`; the pipeline never
//! sees source-specific types.

use rust_decimal::Decimal;

/// Ingestion channel, selecting the per-channel duplicate/phone policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    /// Authenticated public API: duplicates hard-reject.
    Api,
    /// Partner platform import: duplicates and validation failures land
    /// as annotated trash so the order is never silently lost.
    Import,
}

#[derive(Clone, Debug, Default)]
pub struct LeadSubmission {
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub customer_phone: String,
    pub customer_address: String,
    pub customer_city: String,
    pub customer_postal_code: String,
    pub customer_province: Option<String>,
    /// Imports carry the platform's shipping country; the API channel
    /// leaves this unset and gets the primary market.
    pub country: Option<String>,
    pub items: Vec<SubmittedItem>,
    pub publisher_id: Option<String>,
    pub subacc1: Option<String>,
    pub subacc2: Option<String>,
    pub subacc3: Option<String>,
    pub subacc4: Option<String>,
    pub click_id: Option<String>,
    pub campaign_id: Option<i64>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub custom_fields: Option<serde_json::Value>,
    /// Partner order id for imports; cancellation events match on it.
    pub source_ref: Option<String>,
}

/// One requested line. Exactly one of `product_id`/`sku` identifies the
/// catalog product; the declared price is informational only and never
/// used for money computation.
#[derive(Clone, Debug, Default)]
pub struct SubmittedItem {
    pub product_id: Option<i64>,
    pub sku: Option<String>,
    pub quantity: u32,
    pub declared_unit_price: Option<Decimal>,
}
