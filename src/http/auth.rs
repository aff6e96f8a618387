//! API-key authentication.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::domain::Affiliate;
use crate::error::ApiError;
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// The affiliate whose key was presented. Rejections are a single
/// generic 401 whether the header is missing, malformed, or unknown.
pub struct AuthedAffiliate(pub Affiliate);

#[async_trait]
impl FromRequestParts<AppState> for AuthedAffiliate {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(ApiError::unauthorized)?;

        match state.store.affiliate_by_api_key(key).await {
            Ok(Some(affiliate)) => Ok(Self(affiliate)),
            Ok(None) => Err(ApiError::unauthorized()),
            Err(err) => Err(err.into()),
        }
    }
}
