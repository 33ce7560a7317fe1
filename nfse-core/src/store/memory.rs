//! Process-local store, used by tests and the offline CLI commands.
use super::{SaleStore, SaleUpdate, StoreError};
use crate::nfse::{Client, RecordId, Sale, SaleStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct InMemorySaleStore {
    sales: Mutex<HashMap<RecordId, Sale>>,
    clients: Mutex<HashMap<RecordId, Client>>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex
        .lock()
        .map_err(|_| StoreError::Backend("in-memory store lock poisoned".into()))
}

impl InMemorySaleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a sale.
    pub fn insert_sale(&self, sale: Sale) {
        if let Ok(mut sales) = lock(&self.sales) {
            sales.insert(sale.id.clone(), sale);
        }
    }

    /// Insert or replace a client; clients without an id are ignored.
    pub fn insert_client(&self, client: Client) {
        let Some(id) = client.id.clone() else {
            return;
        };
        if let Ok(mut clients) = lock(&self.clients) {
            clients.insert(id, client);
        }
    }

    /// Current copy of a sale row.
    pub fn sale(&self, id: &RecordId) -> Option<Sale> {
        lock(&self.sales).ok()?.get(id).cloned()
    }
}

#[async_trait]
impl SaleStore for InMemorySaleStore {
    async fn begin_processing(&self, sale_id: &RecordId) -> Result<Sale, StoreError> {
        let mut sales = lock(&self.sales)?;
        let sale = sales.get_mut(sale_id).ok_or_else(|| StoreError::NotFound {
            entity: "sale",
            id: sale_id.clone(),
        })?;
        if !sale.status.can_begin_processing() {
            return Err(StoreError::Conflict {
                id: sale_id.clone(),
                status: sale.status,
            });
        }
        let before = sale.clone();
        sale.status = SaleStatus::Processing;
        Ok(before)
    }

    async fn fetch_sale(&self, sale_id: &RecordId) -> Result<Sale, StoreError> {
        lock(&self.sales)?
            .get(sale_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "sale",
                id: sale_id.clone(),
            })
    }

    async fn fetch_client(&self, client_id: &RecordId) -> Result<Client, StoreError> {
        lock(&self.clients)?
            .get(client_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "client",
                id: client_id.clone(),
            })
    }

    async fn update_sale(&self, sale_id: &RecordId, update: &SaleUpdate) -> Result<(), StoreError> {
        let mut sales = lock(&self.sales)?;
        let sale = sales.get_mut(sale_id).ok_or_else(|| StoreError::NotFound {
            entity: "sale",
            id: sale_id.clone(),
        })?;
        update.apply(sale);
        Ok(())
    }
}
