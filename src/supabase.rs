//! Supabase (PostgREST) adapter for persisting extracted leads.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Error;
use crate::leads::LeadDraft;

const LEADS_TABLE: &str = "leads";

/// Seam between handlers and the data store, so tests substitute fakes.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Update the row matching (customer_name, sequence_number) with the
    /// draft's fields, or insert a fresh row when none exists.
    async fn upsert(&self, draft: &LeadDraft) -> Result<StoredLead, Error>;
}

/// A persisted lead as reported back by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredLead {
    pub id: Uuid,
    pub customer_name: String,
    pub sequence_number: i64,
}

/// Supabase client configuration.
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    service_role_key: String,
}

impl SupabaseClient {
    /// Create a new Supabase client from environment variables.
    pub fn from_env(client: Client) -> anyhow::Result<Self> {
        let base_url = std::env::var("SUPABASE_URL")
            .map_err(|_| anyhow::anyhow!("SUPABASE_URL not set"))?;
        let service_role_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .map_err(|_| anyhow::anyhow!("SUPABASE_SERVICE_ROLE_KEY not set"))?;

        Ok(Self {
            client,
            base_url,
            service_role_key,
        })
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, LEADS_TABLE)
    }

    /// Key filters for PostgREST. Values go through reqwest's query encoder,
    /// so customer names with spaces or punctuation are safe.
    fn key_filters(draft: &LeadDraft) -> [(&'static str, String); 2] {
        [
            ("customer_name", format!("eq.{}", draft.customer_name())),
            ("sequence_number", format!("eq.{}", draft.sequence_number)),
        ]
    }

    /// Full-overwrite column set shared by insert and update.
    fn row_fields(draft: &LeadDraft) -> serde_json::Value {
        json!({
            "customer_name": draft.customer_name(),
            "email_address": draft.fields.email_address,
            "phone_number": draft.fields.phone_number,
            "website": draft.fields.website,
            "price": draft.fields.price.unwrap_or(0.0),
            "address": draft.fields.address,
            "start_time": draft.fields.start_time,
            "end_time": draft.fields.end_time,
            "summary": draft.fields.summary,
            "sequence_number": draft.sequence_number,
        })
    }

    async fn find_existing(&self, draft: &LeadDraft) -> Result<Vec<StoredLead>, Error> {
        let resp = self
            .client
            .get(self.table_url())
            .query(&Self::key_filters(draft))
            .query(&[("select", "id,customer_name,sequence_number")])
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key)
            .send()
            .await
            .map_err(|e| Error::Store(format!("lookup failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Store(format!(
                "lookup failed: {} - {}",
                status, text
            )));
        }

        resp.json()
            .await
            .map_err(|e| Error::Store(format!("lookup returned malformed rows: {}", e)))
    }

    async fn update_existing(&self, draft: &LeadDraft) -> Result<StoredLead, Error> {
        let resp = self
            .client
            .patch(self.table_url())
            .query(&Self::key_filters(draft))
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key)
            .header("Prefer", "return=representation")
            .json(&Self::row_fields(draft))
            .send()
            .await
            .map_err(|e| Error::Store(format!("update failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Store(format!(
                "update failed: {} - {}",
                status, text
            )));
        }

        let rows: Vec<StoredLead> = resp
            .json()
            .await
            .map_err(|e| Error::Store(format!("update returned malformed rows: {}", e)))?;

        rows.into_iter()
            .next()
            .ok_or_else(|| Error::Store("update matched no rows".to_string()))
    }

    async fn insert_new(&self, draft: &LeadDraft) -> Result<StoredLead, Error> {
        let mut body = Self::row_fields(draft);
        if let Some(obj) = body.as_object_mut() {
            obj.insert("id".to_string(), json!(Uuid::new_v4()));
            obj.insert("created_at".to_string(), json!(Utc::now().to_rfc3339()));
        }

        let resp = self
            .client
            .post(self.table_url())
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key)
            .header("Prefer", "return=representation")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Store(format!("insert failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Store(format!(
                "insert failed: {} - {}",
                status, text
            )));
        }

        let rows: Vec<StoredLead> = resp
            .json()
            .await
            .map_err(|e| Error::Store(format!("insert returned malformed rows: {}", e)))?;

        rows.into_iter()
            .next()
            .ok_or_else(|| Error::Store("insert returned no rows".to_string()))
    }
}

#[async_trait]
impl LeadStore for SupabaseClient {
    async fn upsert(&self, draft: &LeadDraft) -> Result<StoredLead, Error> {
        let existing = self.find_existing(draft).await?;

        if existing.is_empty() {
            let stored = self.insert_new(draft).await?;
            info!(
                "Inserted lead {} ({}, #{})",
                stored.id, stored.customer_name, stored.sequence_number
            );
            Ok(stored)
        } else {
            debug!(
                "Lead ({}, #{}) exists, overwriting",
                draft.customer_name(),
                draft.sequence_number
            );
            let stored = self.update_existing(draft).await?;
            info!(
                "Updated lead {} ({}, #{})",
                stored.id, stored.customer_name, stored.sequence_number
            );
            Ok(stored)
        }
    }
}
