//! PostgREST adapter for the hosted `sales` and `clients` tables.
use super::{SaleStore, SaleUpdate, StoreError};
use crate::config::StoreConfig;
use crate::nfse::{Client, RecordId, Sale, SaleStatus};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;

const SALES: &str = "sales";
const CLIENTS: &str = "clients";

/// Store backed by a Supabase project, authenticated with the service key.
///
/// # Examples
/// ```rust,no_run
/// use nfse_core::config::StoreConfig;
/// use nfse_core::nfse::RecordId;
/// use nfse_core::store::{SaleStore, SupabaseStore};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let store = SupabaseStore::new(StoreConfig::from_env()?)?;
/// let sale = store.fetch_sale(&RecordId::new("42")).await?;
/// println!("{}", sale.status);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SupabaseStore {
    http: reqwest::Client,
    config: StoreConfig,
}

impl SupabaseStore {
    /// # Errors
    /// Returns [`StoreError::Http`] if the HTTP client cannot be built.
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self { http, config })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.config.url().trim_end_matches('/'))
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        let key = self.config.service_key();
        self.http
            .request(method, self.table_url(table))
            .header("apikey", key)
            .bearer_auth(key)
            .header("Accept", "application/json")
    }

    async fn first_row<T: DeserializeOwned>(
        &self,
        table: &str,
        entity: &'static str,
        id: &RecordId,
    ) -> Result<T, StoreError> {
        let response = self
            .request(Method::GET, table)
            .query(&[("id", format!("eq.{id}")), ("select", "*".to_string())])
            .send()
            .await?;
        let rows: Vec<T> = read_rows(response).await?;
        rows.into_iter().next().ok_or_else(|| StoreError::NotFound {
            entity,
            id: id.clone(),
        })
    }
}

async fn read_rows<T: DeserializeOwned>(response: Response) -> Result<Vec<T>, StoreError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(StoreError::Backend(format!("HTTP {}: {body}", status.as_u16())));
    }
    let body = response.text().await?;
    serde_json::from_str(&body)
        .map_err(|e| StoreError::Backend(format!("unexpected row payload: {e}")))
}

#[async_trait]
impl SaleStore for SupabaseStore {
    async fn begin_processing(&self, sale_id: &RecordId) -> Result<Sale, StoreError> {
        let before = self.fetch_sale(sale_id).await?;
        if !before.status.can_begin_processing() {
            return Err(StoreError::Conflict {
                id: sale_id.clone(),
                status: before.status,
            });
        }

        // The status filter makes the transition a compare-and-set: a
        // concurrent attempt that got there first leaves zero rows matched.
        let response = self
            .request(Method::PATCH, SALES)
            .query(&[
                ("id", format!("eq.{sale_id}")),
                (
                    "status",
                    format!(
                        "in.({},{})",
                        SaleStatus::Pending.as_str(),
                        SaleStatus::Error.as_str()
                    ),
                ),
            ])
            .header("Prefer", "return=representation")
            .json(&json!({ "status": SaleStatus::Processing }))
            .send()
            .await?;
        let updated: Vec<Sale> = read_rows(response).await?;
        if updated.is_empty() {
            let current = self.fetch_sale(sale_id).await?;
            return Err(StoreError::Conflict {
                id: sale_id.clone(),
                status: current.status,
            });
        }
        tracing::debug!(sale_id = %sale_id, "sale moved to processing");
        Ok(before)
    }

    async fn fetch_sale(&self, sale_id: &RecordId) -> Result<Sale, StoreError> {
        self.first_row(SALES, "sale", sale_id).await
    }

    async fn fetch_client(&self, client_id: &RecordId) -> Result<Client, StoreError> {
        self.first_row(CLIENTS, "client", client_id).await
    }

    async fn update_sale(&self, sale_id: &RecordId, update: &SaleUpdate) -> Result<(), StoreError> {
        let response = self
            .request(Method::PATCH, SALES)
            .query(&[("id", format!("eq.{sale_id}"))])
            .header("Prefer", "return=minimal")
            .json(&update.to_patch())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Backend(format!("HTTP {}: {body}", status.as_u16())));
        }
        Ok(())
    }
}
