//! Outbound partner notifications.
//!
//! `dispatch` is fire-and-forget: every outcome, including network
//! failures and non-2xx replies, ends up in the `postback_notifications`
//! log rather than in the caller's lap. `test_dispatch` exercises a
//! template with synthetic values so an affiliate can verify their
//! endpoint before enabling the real thing.
//!
//! Placeholder names match case-insensitively; `{producto}` carries the
//! URL-encoded product name and `{publisherId}` falls back to the
//! affiliate id when the lead has no publisher. Unknown placeholders
//! pass through untouched.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::{Lead, NewPostbackNotification, PostbackOutcome};
use crate::payout::PayoutResolver;
use crate::store::Store;

const LIVE_TIMEOUT: Duration = Duration::from_secs(30);
const TEST_TIMEOUT: Duration = Duration::from_secs(15);
const BODY_SNIPPET_MAX: usize = 1000;

#[derive(Debug)]
pub struct TransportReply {
    pub http_status: u16,
    pub body: String,
}

/// The single outbound GET this module performs, kept behind a trait so
/// dispatch logic is testable without a listening endpoint.
#[async_trait]
pub trait PostbackTransport: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> anyhow::Result<TransportReply>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("leadgate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PostbackTransport for HttpTransport {
    async fn get(&self, url: &str, timeout: Duration) -> anyhow::Result<TransportReply> {
        let response = self.client.get(url).timeout(timeout).send().await?;
        let http_status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(TransportReply { http_status, body })
    }
}

/// Scripted transport for tests; records every URL it was asked to hit.
#[cfg(any(test, feature = "mock"))]
pub struct FixedTransport {
    status: u16,
    body: String,
    fail: Option<String>,
    calls: std::sync::Mutex<Vec<String>>,
}

#[cfg(any(test, feature = "mock"))]
impl FixedTransport {
    pub fn replying(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            fail: None,
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            status: 0,
            body: String::new(),
            fail: Some(message.to_string()),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[cfg(any(test, feature = "mock"))]
#[async_trait]
impl PostbackTransport for FixedTransport {
    async fn get(&self, url: &str, _timeout: Duration) -> anyhow::Result<TransportReply> {
        self.calls.lock().unwrap().push(url.to_string());
        match &self.fail {
            Some(message) => Err(anyhow::anyhow!("{message}")),
            None => Ok(TransportReply {
                http_status: self.status,
                body: self.body.clone(),
            }),
        }
    }
}

/// What a configuration test reports back to the affiliate.
#[derive(Debug, Serialize)]
pub struct TestDispatchResult {
    pub success: bool,
    pub url: String,
    pub http_status: Option<i32>,
    pub error: Option<String>,
}

pub struct PostbackDispatcher {
    store: Arc<dyn Store>,
    payouts: PayoutResolver,
    transport: Arc<dyn PostbackTransport>,
}

impl PostbackDispatcher {
    pub fn new(store: Arc<dyn Store>, transport: Arc<dyn PostbackTransport>) -> Self {
        Self {
            payouts: PayoutResolver::new(store.clone()),
            store,
            transport,
        }
    }

    /// Notifies the owning affiliate about `lead`'s current status, if
    /// they configured a URL for it. Never fails the caller.
    pub async fn dispatch(&self, lead: &Lead) {
        let config = match self.store.postback_config(lead.user_id).await {
            Ok(Some(config)) if config.enabled => config,
            Ok(_) => {
                tracing::debug!(lead = %lead.lead_number, "postback skipped, not configured");
                return;
            }
            Err(err) => {
                tracing::error!(lead = %lead.lead_number, error = %err, "postback config lookup failed");
                return;
            }
        };
        let Some(template) = config.url_for(lead.status) else {
            tracing::debug!(
                lead = %lead.lead_number,
                status = %lead.status,
                "postback skipped, no URL for status"
            );
            return;
        };

        let product = match self.store.product_by_id(lead.product_id).await {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(lead = %lead.lead_number, error = %err, "postback product lookup failed");
                None
            }
        };
        let payout = match (lead.payout, &product) {
            (Some(stamped), _) => stamped,
            (None, Some(product)) => self
                .payouts
                .resolve(product, lead.user_id, lead.publisher_id.as_deref())
                .await
                .unwrap_or_else(|err| {
                    tracing::warn!(lead = %lead.lead_number, error = %err, "payout resolution failed");
                    Decimal::ZERO
                }),
            (None, None) => Decimal::ZERO,
        };
        let product_name = product.map(|p| p.name).unwrap_or_default();

        let publisher = lead
            .publisher_id
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| lead.user_id.to_string());
        let vars = [
            ("leadid", lead.lead_number.clone()),
            ("status", lead.status.to_string()),
            ("payout", payout.to_string()),
            ("publisherid", publisher),
            ("producto", urlencoding::encode(&product_name).into_owned()),
        ];
        let url = substitute_template(template, &vars);

        let note = self
            .attempt(&url, Some(lead.id), lead.user_id, LIVE_TIMEOUT)
            .await;
        self.record(note).await;
    }

    /// Fires `template_url` with placeholder sample data. The attempt is
    /// logged with no lead reference.
    pub async fn test_dispatch(&self, template_url: &str, affiliate_id: i64) -> TestDispatchResult {
        let vars = [
            ("leadid", "TEST123".to_string()),
            ("status", "sale".to_string()),
            ("payout", "10.00".to_string()),
            ("publisherid", affiliate_id.to_string()),
            (
                "producto",
                urlencoding::encode("Producto de prueba").into_owned(),
            ),
        ];
        let url = substitute_template(template_url, &vars);

        let note = self.attempt(&url, None, affiliate_id, TEST_TIMEOUT).await;
        let result = TestDispatchResult {
            success: note.status == PostbackOutcome::Success,
            url: note.url.clone(),
            http_status: note.http_status,
            error: note.error_message.clone(),
        };
        self.record(note).await;
        result
    }

    /// One GET against a substituted URL, flattened to a log row.
    /// Malformed URLs fail here without touching the network.
    async fn attempt(
        &self,
        url: &str,
        lead_id: Option<uuid::Uuid>,
        user_id: i64,
        timeout: Duration,
    ) -> NewPostbackNotification {
        let mut note = NewPostbackNotification {
            lead_id,
            user_id,
            url: url.to_string(),
            status: PostbackOutcome::Failed,
            http_status: None,
            response_body: None,
            error_message: None,
            retry_count: 0,
        };

        match reqwest::Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            Ok(parsed) => {
                note.error_message = Some(format!("unsupported URL scheme '{}'", parsed.scheme()));
                return note;
            }
            Err(err) => {
                note.error_message = Some(format!("invalid postback URL: {err}"));
                return note;
            }
        }

        match self.transport.get(url, timeout).await {
            Ok(reply) => {
                note.http_status = Some(i32::from(reply.http_status));
                note.response_body = Some(snippet(&reply.body));
                if (200..300).contains(&reply.http_status) {
                    note.status = PostbackOutcome::Success;
                } else {
                    note.error_message =
                        Some(format!("unexpected HTTP status {}", reply.http_status));
                }
            }
            Err(err) => {
                note.error_message = Some(err.to_string());
            }
        }
        note
    }

    async fn record(&self, note: NewPostbackNotification) {
        if let Err(err) = self.store.record_notification(&note).await {
            tracing::error!(url = %note.url, error = %err, "failed to record postback notification");
        }
    }
}

/// Replaces `{name}` tokens, matching names case-insensitively against
/// `vars` keys (which must be lowercase). Unknown tokens and stray
/// braces are copied through.
fn substitute_template(template: &str, vars: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                if let Some((_, value)) = vars.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
                    out.push_str(value);
                } else {
                    out.push('{');
                    out.push_str(name);
                    out.push('}');
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET_MAX).collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::domain::{LeadSource, LeadStatus, PostbackConfig};
    use crate::store::MemoryStore;

    fn sample_lead(status: LeadStatus, payout: Option<Decimal>) -> Lead {
        Lead {
            id: Uuid::now_v7(),
            lead_number: "L175000000000042".into(),
            user_id: 42,
            product_id: 10,
            campaign_id: None,
            customer_name: "Juan Perez".into(),
            customer_email: None,
            customer_phone: "1144556677".into(),
            formatted_phone: Some("1144556677".into()),
            customer_address: "Av. Corrientes 1234".into(),
            customer_city: "Buenos Aires".into(),
            customer_postal_code: "C1043".into(),
            customer_province: None,
            country: "Argentina".into(),
            value: Decimal::new(19999, 2),
            payout,
            status,
            publisher_id: Some("pub-9".into()),
            subacc1: None,
            subacc2: None,
            subacc3: None,
            subacc4: None,
            click_id: None,
            ip_address: None,
            user_agent: None,
            custom_fields: None,
            source: LeadSource::Api,
            source_ref: None,
            note: None,
            dup_day: Utc::now().date_naive(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn config_with_sale_url(url: &str) -> PostbackConfig {
        PostbackConfig {
            user_id: 42,
            enabled: true,
            sale_url: Some(url.to_string()),
            hold_url: None,
            rejected_url: None,
            trash_url: None,
            updated_at: Utc::now(),
        }
    }

    fn seed_product(store: &MemoryStore) {
        store.seed_product(
            10,
            "CURSO-MKT-001",
            "Curso Marketing Digital",
            Decimal::new(19999, 2),
            5,
            Decimal::new(1500, 2),
        );
    }

    #[test]
    fn substitution_is_case_insensitive_and_leaves_unknowns() {
        let vars = [
            ("leadid", "L1".to_string()),
            ("status", "sale".to_string()),
            ("payout", "25.00".to_string()),
            ("publisherid", "pub-9".to_string()),
            ("producto", "Curso".to_string()),
        ];
        let url = substitute_template(
            "https://x.example/pb?l={LeadID}&s={STATUS}&p={payout}&u={PublisherId}&n={PRODUCTO}&k={foo}",
            &vars,
        );
        assert_eq!(
            url,
            "https://x.example/pb?l=L1&s=sale&p=25.00&u=pub-9&n=Curso&k={foo}"
        );
    }

    #[test]
    fn stray_brace_is_copied_through() {
        let vars = [("status", "sale".to_string())];
        assert_eq!(
            substitute_template("a{status}b{open", &vars),
            "asaleb{open"
        );
    }

    #[tokio::test]
    async fn successful_dispatch_records_success_with_body_snippet() {
        let store = Arc::new(MemoryStore::new());
        seed_product(&store);
        store.seed_postback_config(config_with_sale_url(
            "https://partner.example/pb?lead={leadId}&st={status}&pay={payout}",
        ));
        let transport = Arc::new(FixedTransport::replying(200, "OK"));
        let dispatcher = PostbackDispatcher::new(store.clone(), transport.clone());

        let lead = sample_lead(LeadStatus::Sale, Some(Decimal::new(2500, 2)));
        dispatcher.dispatch(&lead).await;

        let urls = transport.urls();
        assert_eq!(
            urls,
            vec!["https://partner.example/pb?lead=L175000000000042&st=sale&pay=25.00".to_string()]
        );
        let notes = store.notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].status, PostbackOutcome::Success);
        assert_eq!(notes[0].http_status, Some(200));
        assert_eq!(notes[0].response_body.as_deref(), Some("OK"));
        assert_eq!(notes[0].lead_id, Some(lead.id));
        assert_eq!(notes[0].retry_count, 0);
    }

    #[tokio::test]
    async fn disabled_configuration_sends_and_records_nothing() {
        let store = Arc::new(MemoryStore::new());
        seed_product(&store);
        let mut config = config_with_sale_url("https://partner.example/pb");
        config.enabled = false;
        store.seed_postback_config(config);
        let transport = Arc::new(FixedTransport::replying(200, "OK"));
        let dispatcher = PostbackDispatcher::new(store.clone(), transport.clone());

        dispatcher
            .dispatch(&sample_lead(LeadStatus::Sale, Some(Decimal::ZERO)))
            .await;

        assert!(transport.urls().is_empty());
        assert!(store.notifications().is_empty());
    }

    #[tokio::test]
    async fn missing_slot_for_status_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        seed_product(&store);
        store.seed_postback_config(config_with_sale_url("https://partner.example/pb"));
        let transport = Arc::new(FixedTransport::replying(200, "OK"));
        let dispatcher = PostbackDispatcher::new(store.clone(), transport.clone());

        dispatcher
            .dispatch(&sample_lead(LeadStatus::Rejected, None))
            .await;

        assert!(transport.urls().is_empty());
        assert!(store.notifications().is_empty());
    }

    #[tokio::test]
    async fn non_2xx_reply_is_logged_as_failed() {
        let store = Arc::new(MemoryStore::new());
        seed_product(&store);
        store.seed_postback_config(config_with_sale_url("https://partner.example/pb"));
        let transport = Arc::new(FixedTransport::replying(500, "boom"));
        let dispatcher = PostbackDispatcher::new(store.clone(), transport);

        dispatcher
            .dispatch(&sample_lead(LeadStatus::Sale, Some(Decimal::ZERO)))
            .await;

        let notes = store.notifications();
        assert_eq!(notes[0].status, PostbackOutcome::Failed);
        assert_eq!(notes[0].http_status, Some(500));
        assert_eq!(
            notes[0].error_message.as_deref(),
            Some("unexpected HTTP status 500")
        );
        assert_eq!(notes[0].response_body.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn network_failure_is_logged_as_failed_without_status() {
        let store = Arc::new(MemoryStore::new());
        seed_product(&store);
        store.seed_postback_config(config_with_sale_url("https://partner.example/pb"));
        let transport = Arc::new(FixedTransport::failing("connection refused"));
        let dispatcher = PostbackDispatcher::new(store.clone(), transport);

        dispatcher
            .dispatch(&sample_lead(LeadStatus::Sale, Some(Decimal::ZERO)))
            .await;

        let notes = store.notifications();
        assert_eq!(notes[0].status, PostbackOutcome::Failed);
        assert_eq!(notes[0].http_status, None);
        assert!(notes[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("connection refused"));
    }

    #[tokio::test]
    async fn malformed_substituted_url_never_touches_the_network() {
        let store = Arc::new(MemoryStore::new());
        seed_product(&store);
        store.seed_postback_config(config_with_sale_url("not a url {leadId}"));
        let transport = Arc::new(FixedTransport::replying(200, "OK"));
        let dispatcher = PostbackDispatcher::new(store.clone(), transport.clone());

        dispatcher
            .dispatch(&sample_lead(LeadStatus::Sale, Some(Decimal::ZERO)))
            .await;

        assert!(transport.urls().is_empty());
        let notes = store.notifications();
        assert_eq!(notes[0].status, PostbackOutcome::Failed);
        assert!(notes[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("invalid postback URL"));
    }

    #[tokio::test]
    async fn product_name_is_url_encoded() {
        let store = Arc::new(MemoryStore::new());
        seed_product(&store);
        store.seed_postback_config(config_with_sale_url(
            "https://partner.example/pb?n={producto}",
        ));
        let transport = Arc::new(FixedTransport::replying(200, ""));
        let dispatcher = PostbackDispatcher::new(store.clone(), transport.clone());

        dispatcher
            .dispatch(&sample_lead(LeadStatus::Sale, Some(Decimal::ZERO)))
            .await;

        assert_eq!(
            transport.urls(),
            vec!["https://partner.example/pb?n=Curso%20Marketing%20Digital".to_string()]
        );
    }

    #[tokio::test]
    async fn unstamped_payout_is_resolved_through_the_tiers() {
        let store = Arc::new(MemoryStore::new());
        seed_product(&store);
        store.seed_payout_override(42, 10, Some("pub-9"), Decimal::new(3000, 2));
        store.seed_postback_config({
            let mut config = config_with_sale_url("");
            config.hold_url = Some("https://partner.example/pb?pay={payout}".into());
            config
        });
        let transport = Arc::new(FixedTransport::replying(200, ""));
        let dispatcher = PostbackDispatcher::new(store.clone(), transport.clone());

        dispatcher.dispatch(&sample_lead(LeadStatus::Hold, None)).await;

        assert_eq!(
            transport.urls(),
            vec!["https://partner.example/pb?pay=30.00".to_string()]
        );
    }

    #[tokio::test]
    async fn missing_publisher_falls_back_to_the_affiliate_id() {
        let store = Arc::new(MemoryStore::new());
        seed_product(&store);
        store.seed_postback_config(config_with_sale_url(
            "https://partner.example/pb?u={publisherId}",
        ));
        let transport = Arc::new(FixedTransport::replying(200, ""));
        let dispatcher = PostbackDispatcher::new(store.clone(), transport.clone());

        let mut lead = sample_lead(LeadStatus::Sale, Some(Decimal::ZERO));
        lead.publisher_id = None;
        dispatcher.dispatch(&lead).await;

        assert_eq!(
            transport.urls(),
            vec!["https://partner.example/pb?u=42".to_string()]
        );
    }

    #[tokio::test]
    async fn test_dispatch_logs_without_a_lead_reference() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(FixedTransport::replying(200, "pong"));
        let dispatcher = PostbackDispatcher::new(store.clone(), transport.clone());

        let result = dispatcher
            .test_dispatch("https://partner.example/pb?l={leadId}&p={payout}", 42)
            .await;

        assert!(result.success);
        assert_eq!(result.http_status, Some(200));
        assert_eq!(result.url, "https://partner.example/pb?l=TEST123&p=10.00");
        let notes = store.notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].lead_id, None);
        assert_eq!(notes[0].user_id, 42);
    }

    #[tokio::test]
    async fn test_dispatch_rejects_malformed_template_before_sending() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(FixedTransport::replying(200, ""));
        let dispatcher = PostbackDispatcher::new(store.clone(), transport.clone());

        let result = dispatcher.test_dispatch("ftp://partner.example/pb", 42).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("unsupported URL scheme"));
        assert!(transport.urls().is_empty());
        assert_eq!(store.notifications().len(), 1);
    }

    #[tokio::test]
    async fn long_reply_bodies_are_truncated() {
        let store = Arc::new(MemoryStore::new());
        seed_product(&store);
        store.seed_postback_config(config_with_sale_url("https://partner.example/pb"));
        let body = "x".repeat(1500);
        let transport = Arc::new(FixedTransport::replying(200, &body));
        let dispatcher = PostbackDispatcher::new(store.clone(), transport);

        dispatcher
            .dispatch(&sample_lead(LeadStatus::Sale, Some(Decimal::ZERO)))
            .await;

        let notes = store.notifications();
        assert_eq!(notes[0].response_body.as_deref().unwrap().len(), 1000);
    }
}
