//! Commission resolution.
//!
//! The payout for a converting lead is looked up at the moment of the
//! hold-to-sale transition, most specific tier first:
//!
//! 1. override scoped to (affiliate, product, publisher)
//! 2. override scoped to (affiliate, product)
//! 3. the product's default payout
//! 4. zero
//!
//! A missing tier falls through; a store failure does not, since paying
//! the wrong tier is worse than retrying the transition.

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::domain::Product;
use crate::store::{Store, StoreError};

pub struct PayoutResolver {
    store: Arc<dyn Store>,
}

impl PayoutResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn resolve(
        &self,
        product: &Product,
        affiliate_id: i64,
        publisher_id: Option<&str>,
    ) -> Result<Decimal, StoreError> {
        if let Some(publisher) = publisher_id.map(str::trim).filter(|p| !p.is_empty()) {
            if let Some(amount) = self
                .store
                .publisher_override(affiliate_id, product.id, publisher)
                .await?
            {
                return Ok(amount);
            }
        }
        if let Some(amount) = self
            .store
            .affiliate_override(affiliate_id, product.id)
            .await?
        {
            return Ok(amount);
        }
        Ok(product.payout)
    }
}
