//! In-memory store double for unit and router tests.
//!
//! Mirrors the transactional behavior of `PgStore`: `create_lead` stages
//! every check first and mutates nothing unless the whole write goes
//! through, so injected failures leave stock and lead counts untouched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{
    AffiliateStore, LeadStore, PayoutStore, PostbackStore, ProductCatalog, Result, StoreError,
};
use crate::domain::{
    Affiliate, Lead, LeadItem, LeadStatus, NewLead, NewPostbackConfig, NewPostbackNotification,
    PostbackConfig, PostbackNotification, Product,
};

struct OverrideRow {
    user_id: i64,
    product_id: i64,
    publisher_id: Option<String>,
    amount: Decimal,
}

#[derive(Default)]
struct Inner {
    affiliates: Vec<Affiliate>,
    products: Vec<Product>,
    leads: Vec<Lead>,
    items: Vec<LeadItem>,
    overrides: Vec<OverrideRow>,
    configs: HashMap<i64, PostbackConfig>,
    notifications: Vec<PostbackNotification>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_next_create: AtomicBool,
    fail_conflict_scan: AtomicBool,
    fail_product_lookup: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_affiliate(&self, id: i64, name: &str, api_key: &str) -> Affiliate {
        let affiliate = Affiliate {
            id,
            name: name.to_string(),
            api_key: api_key.to_string(),
            created_at: Utc::now(),
        };
        self.inner.lock().unwrap().affiliates.push(affiliate.clone());
        affiliate
    }

    pub fn seed_product(
        &self,
        id: i64,
        sku: &str,
        name: &str,
        price: Decimal,
        stock: i32,
        payout: Decimal,
    ) -> Product {
        let product = Product {
            id,
            sku: sku.to_string(),
            name: name.to_string(),
            price,
            stock,
            status: "active".to_string(),
            payout,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.inner.lock().unwrap().products.push(product.clone());
        product
    }

    pub fn set_product_status(&self, id: i64, status: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(product) = inner.products.iter_mut().find(|p| p.id == id) {
            product.status = status.to_string();
        }
    }

    pub fn seed_payout_override(
        &self,
        user_id: i64,
        product_id: i64,
        publisher_id: Option<&str>,
        amount: Decimal,
    ) {
        self.inner.lock().unwrap().overrides.push(OverrideRow {
            user_id,
            product_id,
            publisher_id: publisher_id.map(str::to_string),
            amount,
        });
    }

    pub fn seed_postback_config(&self, config: PostbackConfig) {
        self.inner
            .lock()
            .unwrap()
            .configs
            .insert(config.user_id, config);
    }

    /// Next `create_lead` fails after its checks, as a mid-transaction
    /// database error would, leaving no partial writes behind.
    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, Ordering::SeqCst);
    }

    /// All duplicate scans fail until cleared; exercises fail-open.
    pub fn fail_conflict_scans(&self, fail: bool) {
        self.fail_conflict_scan.store(fail, Ordering::SeqCst);
    }

    /// All catalog lookups fail until cleared.
    pub fn fail_product_lookups(&self, fail: bool) {
        self.fail_product_lookup.store(fail, Ordering::SeqCst);
    }

    pub fn stock_of(&self, product_id: i64) -> Option<i32> {
        self.inner
            .lock()
            .unwrap()
            .products
            .iter()
            .find(|p| p.id == product_id)
            .map(|p| p.stock)
    }

    pub fn leads(&self) -> Vec<Lead> {
        self.inner.lock().unwrap().leads.clone()
    }

    pub fn items(&self) -> Vec<LeadItem> {
        self.inner.lock().unwrap().items.clone()
    }

    pub fn notifications(&self) -> Vec<PostbackNotification> {
        self.inner.lock().unwrap().notifications.clone()
    }
}

#[async_trait]
impl AffiliateStore for MemoryStore {
    async fn affiliate_by_api_key(&self, api_key: &str) -> Result<Option<Affiliate>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .affiliates
            .iter()
            .find(|a| a.api_key == api_key)
            .cloned())
    }
}

#[async_trait]
impl ProductCatalog for MemoryStore {
    async fn product_by_id(&self, id: i64) -> Result<Option<Product>> {
        if self.fail_product_lookup.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        let inner = self.inner.lock().unwrap();
        Ok(inner.products.iter().find(|p| p.id == id).cloned())
    }

    async fn product_by_sku(&self, sku: &str) -> Result<Option<Product>> {
        if self.fail_product_lookup.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        let inner = self.inner.lock().unwrap();
        Ok(inner.products.iter().find(|p| p.sku == sku).cloned())
    }
}

#[async_trait]
impl LeadStore for MemoryStore {
    async fn same_day_conflict(
        &self,
        day: NaiveDate,
        candidates: &[String],
        exclude_lead_number: Option<&str>,
    ) -> Result<Option<Lead>> {
        if self.fail_conflict_scan.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        let inner = self.inner.lock().unwrap();
        let mut hits: Vec<&Lead> = inner
            .leads
            .iter()
            .filter(|l| {
                l.dup_day == day
                    && matches!(l.status, LeadStatus::Hold | LeadStatus::Sale)
                    && exclude_lead_number.map_or(true, |x| l.lead_number != x)
                    && candidates.iter().any(|c| {
                        l.formatted_phone.as_deref() == Some(c.as_str()) || l.customer_phone == *c
                    })
            })
            .collect();
        hits.sort_by_key(|l| l.created_at);
        Ok(hits.first().map(|l| (*l).clone()))
    }

    async fn create_lead(&self, new: &NewLead) -> Result<Lead> {
        let mut inner = self.inner.lock().unwrap();

        // The partial unique index equivalent; rows outside hold/sale
        // are not guarded.
        let guarded = matches!(new.status, LeadStatus::Hold | LeadStatus::Sale);
        if let (true, Some(formatted)) = (guarded, new.formatted_phone.as_deref()) {
            let taken = inner.leads.iter().any(|l| {
                l.dup_day == new.dup_day
                    && matches!(l.status, LeadStatus::Hold | LeadStatus::Sale)
                    && l.formatted_phone.as_deref() == Some(formatted)
            });
            if taken {
                return Err(StoreError::DuplicatePhone {
                    phone: formatted.to_string(),
                    day: new.dup_day,
                });
            }
        }

        let mut stock_updates: Vec<(usize, i32)> = Vec::new();
        if new.decrement_stock {
            for item in &new.items {
                let idx = inner
                    .products
                    .iter()
                    .position(|p| p.id == item.product_id)
                    .ok_or(StoreError::NotFound { what: "product" })?;
                if inner.products[idx].stock < item.quantity {
                    return Err(StoreError::OutOfStock {
                        sku: item.sku.clone(),
                        requested: item.quantity,
                    });
                }
                stock_updates.push((idx, item.quantity));
            }
        }

        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }

        let now = Utc::now();
        let lead = Lead {
            id: Uuid::now_v7(),
            lead_number: new.lead_number.clone(),
            user_id: new.user_id,
            product_id: new.product_id,
            campaign_id: new.campaign_id,
            customer_name: new.customer_name.clone(),
            customer_email: new.customer_email.clone(),
            customer_phone: new.customer_phone.clone(),
            formatted_phone: new.formatted_phone.clone(),
            customer_address: new.customer_address.clone(),
            customer_city: new.customer_city.clone(),
            customer_postal_code: new.customer_postal_code.clone(),
            customer_province: new.customer_province.clone(),
            country: new.country.clone(),
            value: new.value,
            payout: new.payout,
            status: new.status,
            publisher_id: new.publisher_id.clone(),
            subacc1: new.subacc1.clone(),
            subacc2: new.subacc2.clone(),
            subacc3: new.subacc3.clone(),
            subacc4: new.subacc4.clone(),
            click_id: new.click_id.clone(),
            ip_address: new.ip_address.clone(),
            user_agent: new.user_agent.clone(),
            custom_fields: new.custom_fields.clone(),
            source: new.source,
            source_ref: new.source_ref.clone(),
            note: new.note.clone(),
            dup_day: new.dup_day,
            created_at: now,
            updated_at: now,
        };

        for (idx, quantity) in stock_updates {
            inner.products[idx].stock -= quantity;
            inner.products[idx].updated_at = now;
        }
        for item in &new.items {
            inner.items.push(LeadItem {
                id: Uuid::now_v7(),
                lead_id: lead.id,
                product_name: item.product_name.clone(),
                sku: item.sku.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                subtotal: item.subtotal,
            });
        }
        inner.leads.push(lead.clone());
        Ok(lead)
    }

    async fn lead_by_number(&self, user_id: i64, lead_number: &str) -> Result<Option<Lead>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .leads
            .iter()
            .find(|l| l.user_id == user_id && l.lead_number == lead_number)
            .cloned())
    }

    async fn lead_by_source_ref(&self, user_id: i64, source_ref: &str) -> Result<Option<Lead>> {
        let inner = self.inner.lock().unwrap();
        let mut hits: Vec<&Lead> = inner
            .leads
            .iter()
            .filter(|l| l.user_id == user_id && l.source_ref.as_deref() == Some(source_ref))
            .collect();
        hits.sort_by_key(|l| std::cmp::Reverse(l.created_at));
        Ok(hits.first().map(|l| (*l).clone()))
    }

    async fn update_lead_status(
        &self,
        id: Uuid,
        status: LeadStatus,
        payout: Option<Decimal>,
        note: Option<&str>,
    ) -> Result<Lead> {
        let mut inner = self.inner.lock().unwrap();
        let lead = inner
            .leads
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or(StoreError::NotFound { what: "lead" })?;
        lead.status = status;
        if let Some(payout) = payout {
            lead.payout = Some(payout);
        }
        if let Some(note) = note {
            lead.note = Some(note.to_string());
        }
        lead.updated_at = Utc::now();
        Ok(lead.clone())
    }

    async fn items_for_lead(&self, lead_id: Uuid) -> Result<Vec<LeadItem>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .items
            .iter()
            .filter(|i| i.lead_id == lead_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PayoutStore for MemoryStore {
    async fn publisher_override(
        &self,
        user_id: i64,
        product_id: i64,
        publisher_id: &str,
    ) -> Result<Option<Decimal>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .overrides
            .iter()
            .find(|o| {
                o.user_id == user_id
                    && o.product_id == product_id
                    && o.publisher_id.as_deref() == Some(publisher_id)
            })
            .map(|o| o.amount))
    }

    async fn affiliate_override(&self, user_id: i64, product_id: i64) -> Result<Option<Decimal>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .overrides
            .iter()
            .find(|o| o.user_id == user_id && o.product_id == product_id && o.publisher_id.is_none())
            .map(|o| o.amount))
    }
}

#[async_trait]
impl PostbackStore for MemoryStore {
    async fn postback_config(&self, user_id: i64) -> Result<Option<PostbackConfig>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.configs.get(&user_id).cloned())
    }

    async fn upsert_postback_config(
        &self,
        user_id: i64,
        config: &NewPostbackConfig,
    ) -> Result<PostbackConfig> {
        let stored = PostbackConfig {
            user_id,
            enabled: config.enabled,
            sale_url: config.sale_url.clone(),
            hold_url: config.hold_url.clone(),
            rejected_url: config.rejected_url.clone(),
            trash_url: config.trash_url.clone(),
            updated_at: Utc::now(),
        };
        self.inner
            .lock()
            .unwrap()
            .configs
            .insert(user_id, stored.clone());
        Ok(stored)
    }

    async fn record_notification(
        &self,
        entry: &NewPostbackNotification,
    ) -> Result<PostbackNotification> {
        let stored = PostbackNotification {
            id: Uuid::now_v7(),
            lead_id: entry.lead_id,
            user_id: entry.user_id,
            url: entry.url.clone(),
            status: entry.status,
            http_status: entry.http_status,
            response_body: entry.response_body.clone(),
            error_message: entry.error_message.clone(),
            retry_count: entry.retry_count,
            created_at: Utc::now(),
        };
        self.inner
            .lock()
            .unwrap()
            .notifications
            .push(stored.clone());
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LeadSource;

    fn new_lead(number: &str, phone: &str, formatted: Option<&str>, qty: i32) -> NewLead {
        NewLead {
            lead_number: number.to_string(),
            user_id: 1,
            product_id: 10,
            campaign_id: None,
            customer_name: "Ana Gomez".into(),
            customer_email: None,
            customer_phone: phone.to_string(),
            formatted_phone: formatted.map(str::to_string),
            customer_address: "Av. Corrientes 1234".into(),
            customer_city: "Buenos Aires".into(),
            customer_postal_code: "C1043".into(),
            customer_province: Some("CABA".into()),
            country: "Argentina".into(),
            value: Decimal::new(19999, 2),
            payout: None,
            status: LeadStatus::Hold,
            publisher_id: None,
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
            items: vec![crate::domain::NewLeadItem {
                product_id: 10,
                product_name: "Widget".into(),
                sku: "SKU-10".into(),
                quantity: qty,
                unit_price: Decimal::new(19999, 2),
                subtotal: Decimal::new(19999, 2) * Decimal::from(qty),
            }],
            decrement_stock: true,
        }
    }

    #[tokio::test]
    async fn injected_create_failure_leaves_no_partial_writes() {
        let store = MemoryStore::new();
        store.seed_product(10, "SKU-10", "Widget", Decimal::new(19999, 2), 5, Decimal::ZERO);

        store.fail_next_create();
        let err = store
            .create_lead(&new_lead("L1", "1144556677", Some("1144556677"), 2))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));

        assert_eq!(store.stock_of(10), Some(5));
        assert!(store.leads().is_empty());
        assert!(store.items().is_empty());

        // The same write goes through once the fault clears.
        store
            .create_lead(&new_lead("L1", "1144556677", Some("1144556677"), 2))
            .await
            .unwrap();
        assert_eq!(store.stock_of(10), Some(3));
        assert_eq!(store.leads().len(), 1);
    }

    #[tokio::test]
    async fn guard_blocks_second_live_lead_with_same_formatted_phone() {
        let store = MemoryStore::new();
        store.seed_product(10, "SKU-10", "Widget", Decimal::new(19999, 2), 5, Decimal::ZERO);

        store
            .create_lead(&new_lead("L1", "15 4455-6677", Some("1144556677"), 1))
            .await
            .unwrap();
        let err = store
            .create_lead(&new_lead("L2", "1144556677", Some("1144556677"), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicatePhone { .. }));
    }

    #[tokio::test]
    async fn out_of_stock_rolls_back_whole_submission() {
        let store = MemoryStore::new();
        store.seed_product(10, "SKU-10", "Widget", Decimal::new(19999, 2), 1, Decimal::ZERO);

        let err = store
            .create_lead(&new_lead("L1", "1144556677", Some("1144556677"), 3))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::OutOfStock { requested: 3, .. }));
        assert_eq!(store.stock_of(10), Some(1));
        assert!(store.leads().is_empty());
    }
}
