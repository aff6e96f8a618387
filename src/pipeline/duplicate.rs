//! Same-day duplicate detection.
//!
//! A candidate's canonical and raw phone forms are both matched against
//! the canonical and raw forms of every lead created today in `hold` or
//! `sale`. Matching raw-against-canonical is deliberate: a resubmission
//! that sends an already-formatted number as its "original" must not
//! slip past the check. Rejected and trashed leads are out of scope so
//! corrected resubmissions go through.
//!
//! A broken store fails open: the check reports not-a-duplicate and
//! logs the error, leaving the partial unique index on the canonical
//! form as the persistence-time backstop.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::Clock;
use crate::diag::DiagnosticSink;
use crate::store::Store;

/// The surviving lead a candidate collided with. Serialized into the
/// 409 response body.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictingLead {
    pub lead_number: String,
    pub customer_name: String,
    pub created_at: DateTime<Utc>,
    pub affiliate_id: i64,
}

#[derive(Clone, Debug, Default)]
pub struct DuplicateCheck {
    pub is_duplicate: bool,
    pub conflict: Option<ConflictingLead>,
}

pub struct DuplicateDetector {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    diag: Arc<dyn DiagnosticSink>,
}

impl DuplicateDetector {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, diag: Arc<dyn DiagnosticSink>) -> Self {
        Self { store, clock, diag }
    }

    /// Searches today's live leads for a phone collision. Never errors:
    /// with both forms blank the check is a no-op, and a failing store
    /// reports not-a-duplicate.
    pub async fn check_today(
        &self,
        formatted_phone: Option<&str>,
        original_phone: Option<&str>,
        exclude_lead_number: Option<&str>,
    ) -> DuplicateCheck {
        let mut candidates: Vec<String> = Vec::new();
        for phone in [formatted_phone, original_phone].into_iter().flatten() {
            let trimmed = phone.trim();
            if !trimmed.is_empty() && !candidates.iter().any(|c| c == trimmed) {
                candidates.push(trimmed.to_string());
            }
        }
        if candidates.is_empty() {
            self.diag.append("dup skip reason=no-phone-forms");
            return DuplicateCheck::default();
        }

        let day = self.clock.local_date();
        let phones = candidates.join(",");
        match self
            .store
            .same_day_conflict(day, &candidates, exclude_lead_number)
            .await
        {
            Ok(Some(lead)) => {
                self.diag.append(&format!(
                    "dup match day={day} phones={phones} conflict={} owner={}",
                    lead.lead_number, lead.user_id
                ));
                DuplicateCheck {
                    is_duplicate: true,
                    conflict: Some(ConflictingLead {
                        lead_number: lead.lead_number,
                        customer_name: lead.customer_name,
                        created_at: lead.created_at,
                        affiliate_id: lead.user_id,
                    }),
                }
            }
            Ok(None) => {
                self.diag
                    .append(&format!("dup clear day={day} phones={phones}"));
                DuplicateCheck::default()
            }
            Err(err) => {
                tracing::error!(error = %err, "duplicate check failed, allowing lead through");
                self.diag
                    .append(&format!("dup error day={day} phones={phones} error={err}"));
                DuplicateCheck::default()
            }
        }
    }
}
