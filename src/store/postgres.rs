//! PostgreSQL store backed by the shared sqlx pool.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    AffiliateStore, LeadStore, PayoutStore, PostbackStore, ProductCatalog, Result, StoreError,
};
use crate::domain::{
    Affiliate, Lead, LeadItem, LeadStatus, NewLead, NewPostbackConfig, NewPostbackNotification,
    PostbackConfig, PostbackNotification, Product,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AffiliateStore for PgStore {
    async fn affiliate_by_api_key(&self, api_key: &str) -> Result<Option<Affiliate>> {
        let row = sqlx::query_as::<_, Affiliate>("SELECT * FROM users WHERE api_key = $1")
            .bind(api_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}

#[async_trait]
impl ProductCatalog for PgStore {
    async fn product_by_id(&self, id: i64) -> Result<Option<Product>> {
        let row = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn product_by_sku(&self, sku: &str) -> Result<Option<Product>> {
        let row = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE sku = $1")
            .bind(sku)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}

#[async_trait]
impl LeadStore for PgStore {
    async fn same_day_conflict(
        &self,
        day: NaiveDate,
        candidates: &[String],
        exclude_lead_number: Option<&str>,
    ) -> Result<Option<Lead>> {
        let row = sqlx::query_as::<_, Lead>(
            "SELECT * FROM leads \
             WHERE dup_day = $1 AND status IN ('hold', 'sale') \
               AND (formatted_phone = ANY($2) OR customer_phone = ANY($2)) \
               AND ($3::text IS NULL OR lead_number <> $3) \
             ORDER BY created_at ASC LIMIT 1",
        )
        .bind(day)
        .bind(candidates)
        .bind(exclude_lead_number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn create_lead(&self, new: &NewLead) -> Result<Lead> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_as::<_, Lead>(
            "INSERT INTO leads (id, lead_number, user_id, product_id, campaign_id, \
             customer_name, customer_email, customer_phone, formatted_phone, \
             customer_address, customer_city, customer_postal_code, customer_province, \
             country, value, payout, status, publisher_id, subacc1, subacc2, subacc3, \
             subacc4, click_id, ip_address, user_agent, custom_fields, source, \
             source_ref, note, dup_day) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, \
             $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, \
             $29, $30) RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(&new.lead_number)
        .bind(new.user_id)
        .bind(new.product_id)
        .bind(new.campaign_id)
        .bind(&new.customer_name)
        .bind(&new.customer_email)
        .bind(&new.customer_phone)
        .bind(&new.formatted_phone)
        .bind(&new.customer_address)
        .bind(&new.customer_city)
        .bind(&new.customer_postal_code)
        .bind(&new.customer_province)
        .bind(&new.country)
        .bind(new.value)
        .bind(new.payout)
        .bind(new.status)
        .bind(&new.publisher_id)
        .bind(&new.subacc1)
        .bind(&new.subacc2)
        .bind(&new.subacc3)
        .bind(&new.subacc4)
        .bind(&new.click_id)
        .bind(&new.ip_address)
        .bind(&new.user_agent)
        .bind(&new.custom_fields)
        .bind(new.source)
        .bind(&new.source_ref)
        .bind(&new.note)
        .bind(new.dup_day)
        .fetch_one(&mut *tx)
        .await;

        let lead = match inserted {
            Ok(lead) => lead,
            Err(sqlx::Error::Database(db))
                if db.is_unique_violation() && db.constraint() == Some("leads_dup_guard") =>
            {
                return Err(StoreError::DuplicatePhone {
                    phone: new.formatted_phone.clone().unwrap_or_default(),
                    day: new.dup_day,
                });
            }
            Err(err) => return Err(err.into()),
        };

        for item in &new.items {
            sqlx::query(
                "INSERT INTO lead_items (id, lead_id, product_name, sku, quantity, \
                 unit_price, subtotal) VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(Uuid::now_v7())
            .bind(lead.id)
            .bind(&item.product_name)
            .bind(&item.sku)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.subtotal)
            .execute(&mut *tx)
            .await?;

            if new.decrement_stock {
                // Conditional decrement; zero rows means someone else
                // took the stock first and the whole insert rolls back.
                let updated = sqlx::query(
                    "UPDATE products SET stock = stock - $2, updated_at = NOW() \
                     WHERE id = $1 AND stock >= $2",
                )
                .bind(item.product_id)
                .bind(item.quantity)
                .execute(&mut *tx)
                .await?;

                if updated.rows_affected() == 0 {
                    return Err(StoreError::OutOfStock {
                        sku: item.sku.clone(),
                        requested: item.quantity,
                    });
                }
            }
        }

        tx.commit().await?;
        Ok(lead)
    }

    async fn lead_by_number(&self, user_id: i64, lead_number: &str) -> Result<Option<Lead>> {
        let row = sqlx::query_as::<_, Lead>(
            "SELECT * FROM leads WHERE user_id = $1 AND lead_number = $2",
        )
        .bind(user_id)
        .bind(lead_number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn lead_by_source_ref(&self, user_id: i64, source_ref: &str) -> Result<Option<Lead>> {
        let row = sqlx::query_as::<_, Lead>(
            "SELECT * FROM leads WHERE user_id = $1 AND source_ref = $2 \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user_id)
        .bind(source_ref)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_lead_status(
        &self,
        id: Uuid,
        status: LeadStatus,
        payout: Option<Decimal>,
        note: Option<&str>,
    ) -> Result<Lead> {
        let row = sqlx::query_as::<_, Lead>(
            "UPDATE leads SET status = $2, payout = COALESCE($3, payout), \
             note = COALESCE($4, note), updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(status)
        .bind(payout)
        .bind(note)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(StoreError::NotFound { what: "lead" })
    }

    async fn items_for_lead(&self, lead_id: Uuid) -> Result<Vec<LeadItem>> {
        let rows = sqlx::query_as::<_, LeadItem>(
            "SELECT * FROM lead_items WHERE lead_id = $1 ORDER BY id",
        )
        .bind(lead_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl PayoutStore for PgStore {
    async fn publisher_override(
        &self,
        user_id: i64,
        product_id: i64,
        publisher_id: &str,
    ) -> Result<Option<Decimal>> {
        let row: Option<(Decimal,)> = sqlx::query_as(
            "SELECT amount FROM payout_overrides \
             WHERE user_id = $1 AND product_id = $2 AND publisher_id = $3",
        )
        .bind(user_id)
        .bind(product_id)
        .bind(publisher_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(amount,)| amount))
    }

    async fn affiliate_override(&self, user_id: i64, product_id: i64) -> Result<Option<Decimal>> {
        let row: Option<(Decimal,)> = sqlx::query_as(
            "SELECT amount FROM payout_overrides \
             WHERE user_id = $1 AND product_id = $2 AND publisher_id IS NULL",
        )
        .bind(user_id)
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(amount,)| amount))
    }
}

#[async_trait]
impl PostbackStore for PgStore {
    async fn postback_config(&self, user_id: i64) -> Result<Option<PostbackConfig>> {
        let row = sqlx::query_as::<_, PostbackConfig>(
            "SELECT * FROM postback_configurations WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn upsert_postback_config(
        &self,
        user_id: i64,
        config: &NewPostbackConfig,
    ) -> Result<PostbackConfig> {
        let row = sqlx::query_as::<_, PostbackConfig>(
            "INSERT INTO postback_configurations \
             (user_id, enabled, sale_url, hold_url, rejected_url, trash_url, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, NOW()) \
             ON CONFLICT (user_id) DO UPDATE SET enabled = $2, sale_url = $3, \
             hold_url = $4, rejected_url = $5, trash_url = $6, updated_at = NOW() \
             RETURNING *",
        )
        .bind(user_id)
        .bind(config.enabled)
        .bind(&config.sale_url)
        .bind(&config.hold_url)
        .bind(&config.rejected_url)
        .bind(&config.trash_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn record_notification(
        &self,
        entry: &NewPostbackNotification,
    ) -> Result<PostbackNotification> {
        let row = sqlx::query_as::<_, PostbackNotification>(
            "INSERT INTO postback_notifications (id, lead_id, user_id, url, status, \
             http_status, response_body, error_message, retry_count) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(entry.lead_id)
        .bind(entry.user_id)
        .bind(&entry.url)
        .bind(entry.status)
        .bind(entry.http_status)
        .bind(&entry.response_body)
        .bind(&entry.error_message)
        .bind(entry.retry_count)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }
}
