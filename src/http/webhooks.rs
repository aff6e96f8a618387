//! Partner platform order events.
//!
//! Created and cancelled orders flow through the same pipeline as API
//! submissions, on the import channel. Updated orders are acknowledged
//! and dropped: once imported, a lead belongs to the affiliate, and the
//! platform must not overwrite their edits.
//!
//! Semantic refusals answer 200 with `success: false` so the platform
//! does not redeliver them; only infrastructure faults get a 5xx.

use axum::extract::State;
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::domain::{Affiliate, Channel, LeadEvent, LeadStatus, LeadSubmission, SubmittedItem};
use crate::error::ApiError;
use crate::http::spawn_postback;
use crate::pipeline::IngestError;
use crate::state::AppState;
use crate::store::StoreError;

use super::auth::AuthedAffiliate;

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderWebhook {
    OrderCreated {
        order: ImportedOrder,
    },
    OrderCancelled {
        #[serde(rename = "orderRef")]
        order_ref: String,
    },
    OrderUpdated {
        #[serde(rename = "orderRef")]
        order_ref: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedOrder {
    /// The platform's order identifier; replays and cancellations match
    /// on it.
    pub order_ref: String,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub customer_phone: String,
    pub customer_address: String,
    pub customer_city: String,
    pub customer_postal_code: String,
    pub customer_province: Option<String>,
    pub country: Option<String>,
    pub items: Vec<ImportedItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedItem {
    pub sku: Option<String>,
    pub quantity: u32,
    pub unit_price: Option<Decimal>,
}

impl ImportedOrder {
    fn into_submission(self) -> LeadSubmission {
        LeadSubmission {
            customer_name: self.customer_name,
            customer_email: self.customer_email,
            customer_phone: self.customer_phone,
            customer_address: self.customer_address,
            customer_city: self.customer_city,
            customer_postal_code: self.customer_postal_code,
            customer_province: self.customer_province,
            country: self.country,
            items: self
                .items
                .into_iter()
                .map(|item| SubmittedItem {
                    product_id: None,
                    sku: item.sku,
                    quantity: item.quantity,
                    declared_unit_price: item.unit_price,
                })
                .collect(),
            source_ref: Some(self.order_ref),
            ..LeadSubmission::default()
        }
    }
}

pub async fn handle_order_event(
    State(state): State<AppState>,
    AuthedAffiliate(affiliate): AuthedAffiliate,
    Json(event): Json<OrderWebhook>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match event {
        OrderWebhook::OrderCreated { order } => import_order(&state, &affiliate, order).await,
        OrderWebhook::OrderCancelled { order_ref } => {
            cancel_order(&state, &affiliate, &order_ref).await
        }
        OrderWebhook::OrderUpdated { order_ref } => {
            tracing::debug!(%order_ref, "order update acknowledged and ignored");
            Ok(Json(serde_json::json!({"success": true, "ignored": true})))
        }
    }
}

async fn import_order(
    state: &AppState,
    affiliate: &Affiliate,
    order: ImportedOrder,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(existing) = state
        .store
        .lead_by_source_ref(affiliate.id, &order.order_ref)
        .await?
    {
        tracing::info!(
            order_ref = %order.order_ref,
            lead = %existing.lead_number,
            "order already imported"
        );
        return Ok(Json(serde_json::json!({
            "success": true,
            "data": {
                "leadNumber": existing.lead_number,
                "status": existing.status,
                "imported": false
            }
        })));
    }

    let order_ref = order.order_ref.clone();
    let submission = order.into_submission();
    match state
        .pipeline
        .ingest(&submission, affiliate, Channel::Import)
        .await
    {
        Ok(lead) => {
            state
                .publish(&LeadEvent::Created {
                    lead_number: lead.lead_number.clone(),
                    user_id: lead.user_id,
                    product_id: lead.product_id,
                    status: lead.status,
                    value: lead.value,
                })
                .await;
            spawn_postback(state, lead.clone());
            Ok(Json(serde_json::json!({
                "success": true,
                "data": {
                    "leadNumber": lead.lead_number,
                    "status": lead.status,
                    "imported": true
                }
            })))
        }
        Err(IngestError::Store(StoreError::Database(err))) => Err(ApiError::internal(err)),
        Err(err) => {
            tracing::info!(%order_ref, error = %err, "order import refused");
            Ok(Json(serde_json::json!({
                "success": false,
                "error": {"code": semantic_code(&err), "message": err.to_string()}
            })))
        }
    }
}

async fn cancel_order(
    state: &AppState,
    affiliate: &Affiliate,
    order_ref: &str,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(lead) = state
        .store
        .lead_by_source_ref(affiliate.id, order_ref)
        .await?
    else {
        tracing::info!(%order_ref, "cancellation for unknown order");
        return Ok(Json(serde_json::json!({
            "success": false,
            "error": {
                "code": "UNKNOWN_ORDER",
                "message": format!("no imported lead for order '{order_ref}'")
            }
        })));
    };

    if !lead.status.can_transition_to(LeadStatus::Trash) {
        tracing::info!(lead = %lead.lead_number, status = %lead.status, "cancellation refused");
        return Ok(Json(serde_json::json!({
            "success": false,
            "error": {
                "code": "INVALID_TRANSITION",
                "message": format!(
                    "lead '{}' is '{}' and keeps its state",
                    lead.lead_number, lead.status
                )
            }
        })));
    }

    let updated = state
        .store
        .update_lead_status(
            lead.id,
            LeadStatus::Trash,
            None,
            Some("Cancelled by source platform"),
        )
        .await?;

    state
        .publish(&LeadEvent::StatusChanged {
            lead_number: updated.lead_number.clone(),
            user_id: updated.user_id,
            from: lead.status,
            to: updated.status,
            payout: updated.payout,
        })
        .await;
    spawn_postback(state, updated.clone());

    Ok(Json(serde_json::json!({
        "success": true,
        "data": {"leadNumber": updated.lead_number, "status": updated.status}
    })))
}

fn semantic_code(err: &IngestError) -> &'static str {
    match err {
        IngestError::ProductNotFound { .. } => "PRODUCT_NOT_FOUND",
        IngestError::ProductInactive { .. } => "PRODUCT_INACTIVE",
        IngestError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
        IngestError::Duplicate { .. } => "DUPLICATE_LEAD",
        IngestError::Validation { .. } => "VALIDATION_ERROR",
        IngestError::Store(StoreError::OutOfStock { .. }) => "INSUFFICIENT_STOCK",
        IngestError::Store(_) => "STORAGE_FAILED",
    }
}
