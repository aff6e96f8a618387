//! Shared handler state.

use std::sync::Arc;

use crate::domain::LeadEvent;
use crate::payout::PayoutResolver;
use crate::pipeline::LeadPipeline;
use crate::postback::PostbackDispatcher;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub pipeline: Arc<LeadPipeline>,
    pub dispatcher: Arc<PostbackDispatcher>,
    pub payouts: Arc<PayoutResolver>,
    pub nats: Option<async_nats::Client>,
}

impl AppState {
    /// Best-effort event publication; the request that produced the
    /// event already succeeded.
    pub async fn publish(&self, event: &LeadEvent) {
        let Some(nats) = &self.nats else { return };
        match serde_json::to_vec(event) {
            Ok(payload) => {
                if let Err(err) = nats.publish(event.subject(), payload.into()).await {
                    tracing::warn!(subject = event.subject(), error = %err, "event publish failed");
                }
            }
            Err(err) => tracing::warn!(error = %err, "event serialization failed"),
        }
    }
}
