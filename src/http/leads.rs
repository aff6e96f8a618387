//! Lead submission and lifecycle endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::domain::{
    Channel, Lead, LeadEvent, LeadSource, LeadStatus, LeadSubmission, Product, SubmittedItem,
};
use crate::error::ApiError;
use crate::http::{ok, spawn_postback, Envelope};
use crate::state::AppState;

use super::auth::AuthedAffiliate;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_product_reference", skip_on_field_errors = false))]
pub struct SubmitLeadRequest {
    #[validate(length(min = 1, max = 200))]
    pub customer_name: String,
    #[validate(email)]
    pub customer_email: Option<String>,
    #[validate(length(min = 1, max = 40))]
    pub customer_phone: String,
    #[validate(length(min = 1, max = 300))]
    pub customer_address: String,
    #[validate(length(min = 1, max = 120))]
    pub customer_city: String,
    #[validate(length(min = 1, max = 20))]
    pub customer_postal_code: String,
    pub customer_province: Option<String>,
    pub product_id: Option<i64>,
    pub product_sku: Option<String>,
    /// Declared price; checked against the catalog, never trusted.
    pub product_price: Option<Decimal>,
    #[serde(default = "default_quantity")]
    #[validate(range(min = 1, max = 100))]
    pub quantity: u32,
    pub publisher_id: Option<String>,
    pub subacc1: Option<String>,
    pub subacc2: Option<String>,
    pub subacc3: Option<String>,
    pub subacc4: Option<String>,
    pub click_id: Option<String>,
    pub campaign_id: Option<i64>,
    #[validate(custom = "validate_ip_address")]
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub custom_fields: Option<serde_json::Value>,
}

fn default_quantity() -> u32 {
    1
}

fn validate_ip_address(value: &str) -> Result<(), ValidationError> {
    value
        .parse::<std::net::IpAddr>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("invalid_ip_address"))
}

fn validate_product_reference(request: &SubmitLeadRequest) -> Result<(), ValidationError> {
    let has_sku = request
        .product_sku
        .as_deref()
        .map_or(false, |sku| !sku.trim().is_empty());
    match (request.product_id.is_some(), has_sku) {
        (true, false) | (false, true) => Ok(()),
        _ => {
            let mut err = ValidationError::new("product_reference");
            err.message = Some("exactly one of productId or productSku is required".into());
            Err(err)
        }
    }
}

impl SubmitLeadRequest {
    fn into_submission(self) -> LeadSubmission {
        LeadSubmission {
            customer_name: self.customer_name,
            customer_email: self.customer_email,
            customer_phone: self.customer_phone,
            customer_address: self.customer_address,
            customer_city: self.customer_city,
            customer_postal_code: self.customer_postal_code,
            customer_province: self.customer_province,
            country: None,
            items: vec![SubmittedItem {
                product_id: self.product_id,
                sku: self.product_sku,
                quantity: self.quantity,
                declared_unit_price: self.product_price,
            }],
            publisher_id: self.publisher_id,
            subacc1: self.subacc1,
            subacc2: self.subacc2,
            subacc3: self.subacc3,
            subacc4: self.subacc4,
            click_id: self.click_id,
            campaign_id: self.campaign_id,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            custom_fields: self.custom_fields,
            source_ref: None,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadSummary {
    pub id: Uuid,
    pub lead_number: String,
    pub status: LeadStatus,
    pub value: Decimal,
    pub payout: Option<Decimal>,
    pub source: LeadSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Lead> for LeadSummary {
    fn from(lead: &Lead) -> Self {
        Self {
            id: lead.id,
            lead_number: lead.lead_number.clone(),
            status: lead.status,
            value: lead.value,
            payout: lead.payout,
            source: lead.source,
            created_at: lead.created_at,
            updated_at: lead.updated_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSummary {
    pub id: i64,
    pub sku: String,
    pub name: String,
    pub price: Decimal,
}

impl From<Product> for ProductSummary {
    fn from(product: Product) -> Self {
        Self {
            id: product.id,
            sku: product.sku,
            name: product.name,
            price: product.price,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitLeadData {
    pub lead: LeadSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<ProductSummary>,
}

pub async fn submit_lead(
    State(state): State<AppState>,
    AuthedAffiliate(affiliate): AuthedAffiliate,
    Json(request): Json<SubmitLeadRequest>,
) -> Result<(StatusCode, Json<Envelope<SubmitLeadData>>), ApiError> {
    if let Err(errors) = request.validate() {
        return Err(ApiError::bad_request("invalid request body")
            .with_details(serde_json::to_value(&errors).unwrap_or_default()));
    }

    let submission = request.into_submission();
    let lead = state
        .pipeline
        .ingest(&submission, &affiliate, Channel::Api)
        .await?;

    let product = match state.store.product_by_id(lead.product_id).await {
        Ok(found) => found,
        Err(err) => {
            tracing::warn!(lead = %lead.lead_number, error = %err, "product summary lookup failed");
            None
        }
    };

    state
        .publish(&LeadEvent::Created {
            lead_number: lead.lead_number.clone(),
            user_id: lead.user_id,
            product_id: lead.product_id,
            status: lead.status,
            value: lead.value,
        })
        .await;
    spawn_postback(&state, lead.clone());

    Ok((
        StatusCode::CREATED,
        Json(Envelope {
            success: true,
            data: SubmitLeadData {
                lead: LeadSummary::from(&lead),
                product: product.map(Into::into),
            },
        }),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLeadStatusRequest {
    pub status: LeadStatus,
    pub note: Option<String>,
}

pub async fn update_lead_status(
    State(state): State<AppState>,
    AuthedAffiliate(affiliate): AuthedAffiliate,
    Path(lead_number): Path<String>,
    Json(request): Json<UpdateLeadStatusRequest>,
) -> Result<Json<Envelope<LeadSummary>>, ApiError> {
    let lead = state
        .store
        .lead_by_number(affiliate.id, &lead_number)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("lead '{lead_number}' not found")))?;

    if !lead.status.can_transition_to(request.status) {
        tracing::info!(
            lead = %lead.lead_number,
            from = %lead.status,
            to = %request.status,
            "status transition refused"
        );
        return Err(ApiError::unprocessable(
            "INVALID_TRANSITION",
            format!(
                "cannot move lead '{}' from '{}' to '{}'",
                lead.lead_number, lead.status, request.status
            ),
        ));
    }

    // The commission is fixed at the moment of conversion.
    let payout = if request.status == LeadStatus::Sale {
        let amount = match state.store.product_by_id(lead.product_id).await? {
            Some(product) => {
                state
                    .payouts
                    .resolve(&product, affiliate.id, lead.publisher_id.as_deref())
                    .await?
            }
            None => {
                tracing::warn!(lead = %lead.lead_number, "product gone, payout defaults to zero");
                Decimal::ZERO
            }
        };
        Some(amount)
    } else {
        None
    };

    let updated = state
        .store
        .update_lead_status(lead.id, request.status, payout, request.note.as_deref())
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
    spawn_postback(&state, updated.clone());

    Ok(ok(LeadSummary::from(&updated)))
}
