//! Postback configuration and the append-only dispatch log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::lead::LeadStatus;

/// Per-affiliate template slots, one per lead status.
#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PostbackConfig {
    pub user_id: i64,
    pub enabled: bool,
    pub sale_url: Option<String>,
    pub hold_url: Option<String>,
    pub rejected_url: Option<String>,
    pub trash_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl PostbackConfig {
    pub fn url_for(&self, status: LeadStatus) -> Option<&str> {
        let slot = match status {
            LeadStatus::Sale => &self.sale_url,
            LeadStatus::Hold => &self.hold_url,
            LeadStatus::Rejected => &self.rejected_url,
            LeadStatus::Trash => &self.trash_url,
        };
        slot.as_deref().filter(|u| !u.trim().is_empty())
    }
}

/// Replacement slots for an affiliate's configuration; the store stamps
/// `updated_at` on write.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPostbackConfig {
    pub enabled: bool,
    pub sale_url: Option<String>,
    pub hold_url: Option<String>,
    pub rejected_url: Option<String>,
    pub trash_url: Option<String>,
}

/// Outcome recorded for one dispatch attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum PostbackOutcome {
    Success,
    Failed,
    Pending,
}

impl PostbackOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Pending => "pending",
        }
    }
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct PostbackNotification {
    pub id: Uuid,
    /// NULL for configuration test dispatches.
    pub lead_id: Option<Uuid>,
    pub user_id: i64,
    pub url: String,
    pub status: PostbackOutcome,
    pub http_status: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewPostbackNotification {
    pub lead_id: Option<Uuid>,
    pub user_id: i64,
    pub url: String,
    pub status: PostbackOutcome,
    pub http_status: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i32,
}
