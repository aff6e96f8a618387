//! Business validation of a normalized submission.
//!
//! Checks are independent: every failed rule lands in the report, none
//! short-circuits the rest. The report never becomes an `Err`; callers
//! branch on `is_valid()` and reuse the structured issues both for API
//! responses and for the note attached to a trashed import.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::LeadSubmission;
use crate::store::Store;

/// One failed or suspicious check, as a machine code plus a message
/// with the offending values interpolated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub code: &'static str,
    pub message: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// All error messages joined, for the trash-note audit trail.
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|i| format!("{}: {}", i.code, i.message))
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn error(&mut self, code: &'static str, message: String) {
        self.errors.push(ValidationIssue { code, message });
    }

    fn warn(&mut self, code: &'static str, message: String) {
        self.warnings.push(ValidationIssue { code, message });
    }
}

fn check_min_len(
    report: &mut ValidationReport,
    code: &'static str,
    label: &str,
    value: &str,
    min: usize,
) {
    let trimmed = value.trim();
    if trimmed.chars().count() < min {
        report.error(
            code,
            format!("{label} '{trimmed}' must be at least {min} characters"),
        );
    }
}

pub struct BusinessValidator {
    store: Arc<dyn Store>,
}

impl BusinessValidator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn validate(&self, submission: &LeadSubmission) -> ValidationReport {
        let mut report = ValidationReport::default();

        check_min_len(
            &mut report,
            "INVALID_CUSTOMER_NAME",
            "customer name",
            &submission.customer_name,
            2,
        );
        check_min_len(
            &mut report,
            "INVALID_PHONE",
            "phone",
            &submission.customer_phone,
            8,
        );
        check_min_len(
            &mut report,
            "INVALID_ADDRESS",
            "street address",
            &submission.customer_address,
            5,
        );
        check_min_len(
            &mut report,
            "INVALID_POSTAL_CODE",
            "postal code",
            &submission.customer_postal_code,
            3,
        );
        if let Some(province) = submission.customer_province.as_deref() {
            check_min_len(&mut report, "INVALID_PROVINCE", "province", province, 2);
        }
        check_min_len(
            &mut report,
            "INVALID_CITY",
            "city",
            &submission.customer_city,
            2,
        );

        if submission.items.is_empty() {
            report.error("NO_ITEMS", "at least one line item is required".to_string());
        }

        for item in &submission.items {
            let sku = match item.sku.as_deref().map(str::trim) {
                Some(sku) if !sku.is_empty() => sku,
                _ => {
                    report.error("MISSING_SKU", "line item is missing its SKU".to_string());
                    continue;
                }
            };

            // A store error on one SKU must not mute checks on the rest.
            match self.store.product_by_sku(sku).await {
                Ok(Some(product)) => {
                    if let Some(declared) = item.declared_unit_price {
                        let delta = (declared - product.price).abs();
                        if delta > Decimal::new(1, 2) {
                            report.error(
                                "PRICE_MISMATCH",
                                format!(
                                    "price for '{sku}' does not match catalog: \
                                     declared {declared}, catalog {}",
                                    product.price
                                ),
                            );
                        } else if !delta.is_zero() {
                            report.warn(
                                "PRICE_MISMATCH",
                                format!(
                                    "price for '{sku}' differs within tolerance: \
                                     declared {declared}, catalog {}",
                                    product.price
                                ),
                            );
                        }
                    }
                }
                Ok(None) => {
                    report.error("SKU_NOT_FOUND", format!("unknown SKU '{sku}'"));
                }
                Err(err) => {
                    tracing::error!(sku, error = %err, "SKU resolution failed during validation");
                    report.error(
                        "SKU_LOOKUP_FAILED",
                        format!("could not resolve SKU '{sku}'"),
                    );
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SubmittedItem;
    use crate::store::MemoryStore;

    fn submission() -> LeadSubmission {
        LeadSubmission {
            customer_name: "Juan Perez".into(),
            customer_phone: "0221 555-6677".into(),
            customer_address: "Calle Mayor 123, Piso 4B".into(),
            customer_city: "La Plata".into(),
            customer_postal_code: "1900".into(),
            customer_province: Some("Buenos Aires".into()),
            items: vec![SubmittedItem {
                product_id: None,
                sku: Some("CURSO-MKT-001".into()),
                quantity: 1,
                declared_unit_price: None,
            }],
            ..LeadSubmission::default()
        }
    }

    fn store_with_product() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.seed_product(
            10,
            "CURSO-MKT-001",
            "Curso Marketing",
            Decimal::new(19999, 2),
            999,
            Decimal::new(1500, 2),
        );
        store
    }

    #[tokio::test]
    async fn well_formed_submission_passes() {
        let validator = BusinessValidator::new(store_with_product());
        let report = validator.validate(&submission()).await;
        assert!(report.is_valid(), "unexpected errors: {:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn every_failed_field_check_is_collected() {
        let validator = BusinessValidator::new(Arc::new(MemoryStore::new()));
        let bad = LeadSubmission {
            customer_name: "J".into(),
            customer_phone: "123".into(),
            customer_address: "x".into(),
            customer_city: "y".into(),
            customer_postal_code: "1".into(),
            customer_province: Some("z".into()),
            items: vec![],
            ..LeadSubmission::default()
        };

        let report = validator.validate(&bad).await;
        let codes: Vec<&str> = report.errors.iter().map(|i| i.code).collect();
        assert_eq!(
            codes,
            vec![
                "INVALID_CUSTOMER_NAME",
                "INVALID_PHONE",
                "INVALID_ADDRESS",
                "INVALID_POSTAL_CODE",
                "INVALID_PROVINCE",
                "INVALID_CITY",
                "NO_ITEMS",
            ]
        );
    }

    #[tokio::test]
    async fn absent_province_is_not_checked() {
        let validator = BusinessValidator::new(store_with_product());
        let mut s = submission();
        s.customer_province = None;
        let report = validator.validate(&s).await;
        assert!(report.is_valid());
    }

    #[tokio::test]
    async fn unknown_sku_is_reported_with_the_sku() {
        let validator = BusinessValidator::new(store_with_product());
        let mut s = submission();
        s.items[0].sku = Some("NO-SUCH-SKU".into());
        let report = validator.validate(&s).await;
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].code, "SKU_NOT_FOUND");
        assert!(report.errors[0].message.contains("NO-SUCH-SKU"));
    }

    #[tokio::test]
    async fn blank_sku_is_reported() {
        let validator = BusinessValidator::new(store_with_product());
        let mut s = submission();
        s.items[0].sku = Some("   ".into());
        let report = validator.validate(&s).await;
        assert_eq!(report.errors[0].code, "MISSING_SKU");
    }

    #[tokio::test]
    async fn price_mismatch_reports_both_values() {
        let validator = BusinessValidator::new(store_with_product());
        let mut s = submission();
        s.items[0].declared_unit_price = Some(Decimal::new(9999, 2));
        let report = validator.validate(&s).await;
        assert_eq!(report.errors[0].code, "PRICE_MISMATCH");
        assert!(report.errors[0].message.contains("99.99"));
        assert!(report.errors[0].message.contains("199.99"));
    }

    #[tokio::test]
    async fn price_delta_within_tolerance_is_only_a_warning() {
        let validator = BusinessValidator::new(store_with_product());
        let mut s = submission();
        s.items[0].declared_unit_price = Some(Decimal::new(19998, 2));
        let report = validator.validate(&s).await;
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].code, "PRICE_MISMATCH");
    }

    #[tokio::test]
    async fn exact_price_raises_nothing() {
        let validator = BusinessValidator::new(store_with_product());
        let mut s = submission();
        s.items[0].declared_unit_price = Some(Decimal::new(19999, 2));
        let report = validator.validate(&s).await;
        assert!(report.is_valid());
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn lookup_failure_is_its_own_code_and_does_not_abort_other_items() {
        let store = store_with_product();
        store.fail_product_lookups(true);
        let validator = BusinessValidator::new(store);
        let mut s = submission();
        s.items.push(SubmittedItem {
            product_id: None,
            sku: Some("SECOND-SKU".into()),
            quantity: 1,
            declared_unit_price: None,
        });

        let report = validator.validate(&s).await;
        let codes: Vec<&str> = report.errors.iter().map(|i| i.code).collect();
        assert_eq!(codes, vec!["SKU_LOOKUP_FAILED", "SKU_LOOKUP_FAILED"]);
    }

    #[tokio::test]
    async fn summary_joins_codes_and_messages() {
        let validator = BusinessValidator::new(store_with_product());
        let mut s = submission();
        s.customer_name = "J".into();
        s.items[0].sku = Some("NO-SUCH-SKU".into());
        let report = validator.validate(&s).await;
        let summary = report.summary();
        assert!(summary.contains("INVALID_CUSTOMER_NAME"));
        assert!(summary.contains("SKU_NOT_FOUND"));
        assert!(summary.contains("; "));
    }
}
