//! Postback configuration endpoints.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use crate::domain::{NewPostbackConfig, PostbackConfig};
use crate::error::ApiError;
use crate::http::{ok, Envelope};
use crate::postback::TestDispatchResult;
use crate::state::AppState;

use super::auth::AuthedAffiliate;

pub async fn get_config(
    State(state): State<AppState>,
    AuthedAffiliate(affiliate): AuthedAffiliate,
) -> Result<Json<Envelope<Option<PostbackConfig>>>, ApiError> {
    let config = state.store.postback_config(affiliate.id).await?;
    Ok(ok(config))
}

pub async fn put_config(
    State(state): State<AppState>,
    AuthedAffiliate(affiliate): AuthedAffiliate,
    Json(request): Json<NewPostbackConfig>,
) -> Result<Json<Envelope<PostbackConfig>>, ApiError> {
    let slots = [
        ("saleUrl", &request.sale_url),
        ("holdUrl", &request.hold_url),
        ("rejectedUrl", &request.rejected_url),
        ("trashUrl", &request.trash_url),
    ];
    for (slot, url) in slots {
        if let Some(url) = url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            validate_template_url(slot, url)?;
        }
    }

    let stored = state
        .store
        .upsert_postback_config(affiliate.id, &request)
        .await?;
    Ok(ok(stored))
}

/// Placeholders survive URL parsing, so a template can be checked
/// before substitution.
fn validate_template_url(slot: &str, url: &str) -> Result<(), ApiError> {
    match reqwest::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        Ok(parsed) => Err(ApiError::bad_request(format!(
            "{slot}: unsupported scheme '{}'",
            parsed.scheme()
        ))),
        Err(err) => Err(ApiError::bad_request(format!("{slot}: {err}"))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestPostbackRequest {
    pub url: String,
}

pub async fn test_postback(
    State(state): State<AppState>,
    AuthedAffiliate(affiliate): AuthedAffiliate,
    Json(request): Json<TestPostbackRequest>,
) -> Json<Envelope<TestDispatchResult>> {
    let result = state
        .dispatcher
        .test_dispatch(&request.url, affiliate.id)
        .await;
    ok(result)
}
