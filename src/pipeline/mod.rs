//! Lead ingestion pipeline.
//!
//! `LeadPipeline::ingest` runs a submission through the fixed sequence:
//! catalog resolution, active/stock checks, authoritative value
//! computation, phone normalization, duplicate detection, business
//! validation, then one atomic persistence step. The first hard failure
//! short-circuits; what counts as hard depends on the channel:
//!
//! - `Channel::Api` rejects duplicates and validation failures back to
//!   the caller.
//! - `Channel::Import` persists them as `trash` with an annotated note
//!   and no stock movement, so the order is never silently dropped.
//!
//! Phone normalization failure is not fatal on either channel: the lead
//! keeps its raw phone and the canonical slot stays empty.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;

use crate::clock::Clock;
use crate::domain::{
    lead_number, Affiliate, Channel, Lead, LeadSource, LeadStatus, LeadSubmission, NewLead,
    NewLeadItem, Product, SubmittedItem, DEFAULT_COUNTRY,
};
use crate::store::{Store, StoreError};

pub mod duplicate;
pub mod phone;
pub mod validate;

pub use duplicate::{ConflictingLead, DuplicateCheck, DuplicateDetector};
pub use phone::{
    AreaCodeTable, HttpMobileLookup, MobileLookup, NoLookup, PhoneNormalizer, PhoneOutcome,
};
pub use validate::{BusinessValidator, ValidationIssue, ValidationReport};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("product '{reference}' not found")]
    ProductNotFound { reference: String },

    #[error("product '{sku}' is not active")]
    ProductInactive { sku: String },

    #[error("insufficient stock for '{sku}'. Available: {available}, Requested: {requested}")]
    InsufficientStock {
        sku: String,
        available: i32,
        requested: i32,
    },

    /// `conflict` is `None` only when the persistence guard caught a
    /// race the scan could not attribute.
    #[error("duplicate lead")]
    Duplicate {
        conflict: Option<ConflictingLead>,
    },

    #[error("validation failed: {}", report.summary())]
    Validation { report: ValidationReport },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct LeadPipeline {
    store: Arc<dyn Store>,
    phones: PhoneNormalizer,
    duplicates: DuplicateDetector,
    validator: BusinessValidator,
    clock: Arc<dyn Clock>,
}

impl LeadPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        phones: PhoneNormalizer,
        duplicates: DuplicateDetector,
        validator: BusinessValidator,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            phones,
            duplicates,
            validator,
            clock,
        }
    }

    pub async fn ingest(
        &self,
        submission: &LeadSubmission,
        owner: &Affiliate,
        channel: Channel,
    ) -> Result<Lead, IngestError> {
        let resolved = self.resolve_items(submission).await?;
        self.check_stock(&resolved)?;

        // The caller-declared price never participates here.
        let value: Decimal = resolved
            .iter()
            .map(|(item, product)| product.price * Decimal::from(item.quantity))
            .sum();

        let country = submission
            .country
            .clone()
            .unwrap_or_else(|| DEFAULT_COUNTRY.to_string());
        let phone = self
            .phones
            .normalize(
                &submission.customer_phone,
                &country,
                owner.id,
                submission.publisher_id.as_deref(),
            )
            .await;

        let dup = self
            .duplicates
            .check_today(
                phone.formatted.as_deref(),
                Some(&submission.customer_phone),
                None,
            )
            .await;
        let mut trash_note: Option<String> = None;
        if dup.is_duplicate {
            match channel {
                Channel::Api => {
                    return Err(IngestError::Duplicate {
                        conflict: dup.conflict,
                    })
                }
                Channel::Import => trash_note = Some(duplicate_note(dup.conflict.as_ref())),
            }
        }

        let report = self
            .validator
            .validate(&enriched_for_validation(submission, &resolved))
            .await;
        if !report.is_valid() {
            // An import without a resolvable product cannot be parked as
            // trash; there is no row to hang it on.
            if matches!(channel, Channel::Api) || resolved.is_empty() {
                return Err(IngestError::Validation { report });
            }
            let summary = report.summary();
            trash_note = Some(match trash_note {
                Some(prev) => format!("{prev}; {summary}"),
                None => summary,
            });
        }

        let status = if trash_note.is_some() {
            LeadStatus::Trash
        } else {
            LeadStatus::Hold
        };
        let source = match channel {
            Channel::Api => LeadSource::Api,
            Channel::Import => LeadSource::Import,
        };
        let primary = &resolved[0].1;

        let new = NewLead {
            lead_number: lead_number(source, self.clock.now(), owner.id),
            user_id: owner.id,
            product_id: primary.id,
            campaign_id: submission.campaign_id,
            customer_name: submission.customer_name.trim().to_string(),
            customer_email: submission.customer_email.clone(),
            customer_phone: submission.customer_phone.clone(),
            formatted_phone: phone.formatted.clone(),
            customer_address: submission.customer_address.trim().to_string(),
            customer_city: submission.customer_city.trim().to_string(),
            customer_postal_code: submission.customer_postal_code.trim().to_string(),
            customer_province: submission.customer_province.clone(),
            country,
            value,
            payout: None,
            status,
            publisher_id: submission.publisher_id.clone(),
            subacc1: submission.subacc1.clone(),
            subacc2: submission.subacc2.clone(),
            subacc3: submission.subacc3.clone(),
            subacc4: submission.subacc4.clone(),
            click_id: submission.click_id.clone(),
            ip_address: submission.ip_address.clone(),
            user_agent: submission.user_agent.clone(),
            custom_fields: submission.custom_fields.clone(),
            source,
            source_ref: submission.source_ref.clone(),
            note: trash_note,
            dup_day: self.clock.local_date(),
            items: resolved
                .iter()
                .map(|(item, product)| NewLeadItem {
                    product_id: product.id,
                    product_name: product.name.clone(),
                    sku: product.sku.clone(),
                    quantity: item.quantity as i32,
                    unit_price: product.price,
                    subtotal: product.price * Decimal::from(item.quantity),
                })
                .collect(),
            decrement_stock: status == LeadStatus::Hold,
        };

        match self.store.create_lead(&new).await {
            Ok(lead) => Ok(lead),
            Err(StoreError::DuplicatePhone { .. }) => {
                // Another submission claimed the phone between the scan
                // and the insert.
                let rerun = self
                    .duplicates
                    .check_today(
                        phone.formatted.as_deref(),
                        Some(&submission.customer_phone),
                        None,
                    )
                    .await;
                match channel {
                    Channel::Api => Err(IngestError::Duplicate {
                        conflict: rerun.conflict,
                    }),
                    Channel::Import => {
                        let trashed = NewLead {
                            status: LeadStatus::Trash,
                            note: Some(duplicate_note(rerun.conflict.as_ref())),
                            decrement_stock: false,
                            ..new
                        };
                        Ok(self.store.create_lead(&trashed).await?)
                    }
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn resolve_items<'a>(
        &self,
        submission: &'a LeadSubmission,
    ) -> Result<Vec<(&'a SubmittedItem, Product)>, IngestError> {
        let mut resolved = Vec::with_capacity(submission.items.len());
        for item in &submission.items {
            let found = match (item.product_id, item.sku.as_deref()) {
                (Some(id), _) => self.store.product_by_id(id).await?,
                (None, Some(sku)) => self.store.product_by_sku(sku).await?,
                (None, None) => None,
            };
            let Some(product) = found else {
                return Err(IngestError::ProductNotFound {
                    reference: item
                        .product_id
                        .map(|id| id.to_string())
                        .or_else(|| item.sku.clone())
                        .unwrap_or_else(|| "?".to_string()),
                });
            };
            if !product.is_active() {
                return Err(IngestError::ProductInactive { sku: product.sku });
            }
            resolved.push((item, product));
        }
        Ok(resolved)
    }

    /// Per-product totals against current stock. The atomic conditional
    /// decrement re-checks inside the transaction; this pass exists to
    /// report counts before any write.
    fn check_stock(&self, resolved: &[(&SubmittedItem, Product)]) -> Result<(), IngestError> {
        let mut totals: HashMap<i64, i32> = HashMap::new();
        for (item, product) in resolved {
            *totals.entry(product.id).or_default() += item.quantity as i32;
        }
        for (_, product) in resolved {
            let requested = totals[&product.id];
            if requested > product.stock {
                return Err(IngestError::InsufficientStock {
                    sku: product.sku.clone(),
                    available: product.stock,
                    requested,
                });
            }
        }
        Ok(())
    }
}

fn duplicate_note(conflict: Option<&ConflictingLead>) -> String {
    match conflict {
        Some(c) => format!("Duplicate of lead {} (same-day phone match)", c.lead_number),
        None => "Duplicate same-day phone (conflicting lead not identified)".to_string(),
    }
}

/// Validation sees every item with a SKU: items submitted by product id
/// get the catalog SKU filled in.
fn enriched_for_validation(
    submission: &LeadSubmission,
    resolved: &[(&SubmittedItem, Product)],
) -> LeadSubmission {
    let mut copy = submission.clone();
    copy.items = resolved
        .iter()
        .map(|(item, product)| SubmittedItem {
            product_id: item.product_id,
            sku: Some(
                item.sku
                    .clone()
                    .unwrap_or_else(|| product.sku.clone()),
            ),
            quantity: item.quantity,
            declared_unit_price: item.declared_unit_price,
        })
        .collect();
    copy
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::phone::FixedLookup;
    use super::*;
    use crate::clock::SteppingClock;
    use crate::diag::MemorySink;
    use crate::store::MemoryStore;

    fn pipeline(store: Arc<MemoryStore>) -> LeadPipeline {
        let clock: Arc<dyn Clock> = Arc::new(SteppingClock::new(Utc::now()));
        let sink = Arc::new(MemorySink::new());
        LeadPipeline::new(
            store.clone(),
            PhoneNormalizer::new(
                AreaCodeTable::argentina(),
                Arc::new(FixedLookup(Some(false))),
                sink.clone(),
            ),
            DuplicateDetector::new(store.clone(), clock.clone(), sink.clone()),
            BusinessValidator::new(store.clone()),
            clock,
        )
    }

    fn owner() -> Affiliate {
        Affiliate {
            id: 42,
            name: "Acme Media".into(),
            api_key: "k-acme".into(),
            created_at: Utc::now(),
        }
    }

    fn course_submission() -> LeadSubmission {
        LeadSubmission {
            customer_name: "Juan Perez".into(),
            customer_phone: "34666777888".into(),
            customer_address: "Calle Mayor 123, Piso 4B".into(),
            customer_city: "Madrid".into(),
            customer_postal_code: "28013".into(),
            items: vec![SubmittedItem {
                product_id: None,
                sku: Some("CURSO-MKT-001".into()),
                quantity: 1,
                declared_unit_price: None,
            }],
            ..LeadSubmission::default()
        }
    }

    fn seed_course(store: &MemoryStore, stock: i32) {
        store.seed_product(
            10,
            "CURSO-MKT-001",
            "Curso Marketing Digital",
            Decimal::new(19999, 2),
            stock,
            Decimal::new(1500, 2),
        );
    }

    #[tokio::test]
    async fn accepted_submission_creates_hold_lead_and_decrements_stock() {
        let store = Arc::new(MemoryStore::new());
        seed_course(&store, 999);
        let pipeline = pipeline(store.clone());

        let lead = pipeline
            .ingest(&course_submission(), &owner(), Channel::Api)
            .await
            .unwrap();

        assert_eq!(lead.status, LeadStatus::Hold);
        assert_eq!(lead.value, Decimal::new(19999, 2));
        assert!(lead.lead_number.starts_with('L'));
        assert!(lead.lead_number.ends_with("42"));
        // The foreign-format phone fails normalization but does not
        // block ingestion.
        assert_eq!(lead.formatted_phone, None);
        assert_eq!(lead.customer_phone, "34666777888");
        assert_eq!(store.stock_of(10), Some(998));

        let items = store.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].sku, "CURSO-MKT-001");
        assert_eq!(items[0].unit_price, Decimal::new(19999, 2));
    }

    #[tokio::test]
    async fn oversold_quantity_reports_counts_and_leaves_stock_alone() {
        let store = Arc::new(MemoryStore::new());
        seed_course(&store, 147);
        let pipeline = pipeline(store.clone());

        let mut submission = course_submission();
        submission.items[0].quantity = 200;
        let err = pipeline
            .ingest(&submission, &owner(), Channel::Api)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            IngestError::InsufficientStock {
                available: 147,
                requested: 200,
                ..
            }
        ));
        assert!(err.to_string().contains("Available: 147, Requested: 200"));
        assert_eq!(store.stock_of(10), Some(147));
        assert!(store.leads().is_empty());
    }

    #[tokio::test]
    async fn same_day_resubmission_is_rejected_with_the_first_lead_number() {
        let store = Arc::new(MemoryStore::new());
        seed_course(&store, 999);
        let pipeline = pipeline(store.clone());

        let first = pipeline
            .ingest(&course_submission(), &owner(), Channel::Api)
            .await
            .unwrap();
        let err = pipeline
            .ingest(&course_submission(), &owner(), Channel::Api)
            .await
            .unwrap_err();

        match err {
            IngestError::Duplicate { conflict } => {
                assert_eq!(conflict.unwrap().lead_number, first.lead_number);
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
        assert_eq!(store.stock_of(10), Some(998));
    }

    #[tokio::test]
    async fn inactive_product_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        seed_course(&store, 999);
        store.set_product_status(10, "inactive");
        let pipeline = pipeline(store.clone());

        let err = pipeline
            .ingest(&course_submission(), &owner(), Channel::Api)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::ProductInactive { .. }));
    }

    #[tokio::test]
    async fn unknown_product_reference_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(store);

        let err = pipeline
            .ingest(&course_submission(), &owner(), Channel::Api)
            .await
            .unwrap_err();
        match err {
            IngestError::ProductNotFound { reference } => {
                assert_eq!(reference, "CURSO-MKT-001");
            }
            other => panic!("expected not-found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn declared_price_never_changes_the_computed_value() {
        let store = Arc::new(MemoryStore::new());
        seed_course(&store, 999);
        let pipeline = pipeline(store.clone());

        // Within tolerance: accepted, but valued from the catalog.
        let mut submission = course_submission();
        submission.items[0].declared_unit_price = Some(Decimal::new(19998, 2));
        let lead = pipeline
            .ingest(&submission, &owner(), Channel::Api)
            .await
            .unwrap();
        assert_eq!(lead.value, Decimal::new(19999, 2));
    }

    #[tokio::test]
    async fn tampered_price_is_rejected_on_the_api_channel() {
        let store = Arc::new(MemoryStore::new());
        seed_course(&store, 999);
        let pipeline = pipeline(store.clone());

        let mut submission = course_submission();
        submission.items[0].declared_unit_price = Some(Decimal::new(100, 2));
        let err = pipeline
            .ingest(&submission, &owner(), Channel::Api)
            .await
            .unwrap_err();
        match err {
            IngestError::Validation { report } => {
                assert_eq!(report.errors[0].code, "PRICE_MISMATCH");
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
        assert!(store.leads().is_empty());
        assert_eq!(store.stock_of(10), Some(999));
    }

    #[tokio::test]
    async fn import_duplicate_lands_as_trash_without_stock_movement() {
        let store = Arc::new(MemoryStore::new());
        seed_course(&store, 999);
        let pipeline = pipeline(store.clone());

        let first = pipeline
            .ingest(&course_submission(), &owner(), Channel::Import)
            .await
            .unwrap();
        assert!(first.lead_number.starts_with('W'));
        assert_eq!(store.stock_of(10), Some(998));

        let second = pipeline
            .ingest(&course_submission(), &owner(), Channel::Import)
            .await
            .unwrap();
        assert_eq!(second.status, LeadStatus::Trash);
        let note = second.note.unwrap();
        assert!(note.contains(&first.lead_number));
        // Trash never takes stock.
        assert_eq!(store.stock_of(10), Some(998));
    }

    #[tokio::test]
    async fn import_validation_failure_lands_as_annotated_trash() {
        let store = Arc::new(MemoryStore::new());
        seed_course(&store, 999);
        let pipeline = pipeline(store.clone());

        let mut submission = course_submission();
        submission.customer_name = "J".into();
        let lead = pipeline
            .ingest(&submission, &owner(), Channel::Import)
            .await
            .unwrap();

        assert_eq!(lead.status, LeadStatus::Trash);
        assert!(lead.note.unwrap().contains("INVALID_CUSTOMER_NAME"));
        assert_eq!(store.stock_of(10), Some(999));
    }

    #[tokio::test]
    async fn persistence_failure_leaves_no_partial_state() {
        let store = Arc::new(MemoryStore::new());
        seed_course(&store, 999);
        let pipeline = pipeline(store.clone());

        store.fail_next_create();
        let err = pipeline
            .ingest(&course_submission(), &owner(), Channel::Api)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Store(_)));
        assert_eq!(store.stock_of(10), Some(999));
        assert!(store.leads().is_empty());
        assert!(store.items().is_empty());
    }

    #[tokio::test]
    async fn guard_race_surfaces_as_duplicate_on_the_api_channel() {
        let store = Arc::new(MemoryStore::new());
        seed_course(&store, 999);
        let pipeline = pipeline(store.clone());

        // A normalizable phone this time, so the canonical guard applies.
        let mut submission = course_submission();
        submission.customer_phone = "0221 555-6677".into();
        pipeline
            .ingest(&submission, &owner(), Channel::Api)
            .await
            .unwrap();

        // With the scan blind, only the guard can catch the collision.
        store.fail_conflict_scans(true);
        let err = pipeline
            .ingest(&submission, &owner(), Channel::Api)
            .await
            .unwrap_err();
        match err {
            IngestError::Duplicate { conflict } => assert!(conflict.is_none()),
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn guard_race_on_import_retries_as_trash() {
        let store = Arc::new(MemoryStore::new());
        seed_course(&store, 999);
        let pipeline = pipeline(store.clone());

        let mut submission = course_submission();
        submission.customer_phone = "0221 555-6677".into();
        pipeline
            .ingest(&submission, &owner(), Channel::Import)
            .await
            .unwrap();

        store.fail_conflict_scans(true);
        let second = pipeline
            .ingest(&submission, &owner(), Channel::Import)
            .await
            .unwrap();
        assert_eq!(second.status, LeadStatus::Trash);
        assert!(second.note.unwrap().contains("Duplicate"));
        assert_eq!(store.stock_of(10), Some(998));
    }

    #[tokio::test]
    async fn multi_item_value_sums_catalog_subtotals() {
        let store = Arc::new(MemoryStore::new());
        seed_course(&store, 999);
        store.seed_product(
            20,
            "EBOOK-001",
            "Ebook Ventas",
            Decimal::new(5000, 2),
            10,
            Decimal::ZERO,
        );
        let pipeline = pipeline(store.clone());

        let mut submission = course_submission();
        submission.items.push(SubmittedItem {
            product_id: Some(20),
            sku: None,
            quantity: 2,
            declared_unit_price: None,
        });
        let lead = pipeline
            .ingest(&submission, &owner(), Channel::Api)
            .await
            .unwrap();

        // 199.99 + 2 x 50.00
        assert_eq!(lead.value, Decimal::new(29999, 2));
        assert_eq!(store.stock_of(20), Some(8));
        assert_eq!(store.items().len(), 2);
    }
}
