//! Lead lifecycle events, published as JSON when NATS is configured.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::lead::LeadStatus;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LeadEvent {
    Created {
        lead_number: String,
        user_id: i64,
        product_id: i64,
        status: LeadStatus,
        value: Decimal,
    },
    StatusChanged {
        lead_number: String,
        user_id: i64,
        from: LeadStatus,
        to: LeadStatus,
        payout: Option<Decimal>,
    },
}

impl LeadEvent {
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Created { .. } => "leadgate.leads.created",
            Self::StatusChanged { .. } => "leadgate.leads.status",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = LeadEvent::Created {
            lead_number: "L170000000000042".into(),
            user_id: 42,
            product_id: 7,
            status: LeadStatus::Hold,
            value: Decimal::new(19999, 2),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "created");
        assert_eq!(json["status"], "hold");
        assert_eq!(event.subject(), "leadgate.leads.created");
    }
}
