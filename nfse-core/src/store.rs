//! Persistence of sales and clients.
use crate::nfse::{Client, IssuedNfse, RecordId, RpsNumber, Sale, SaleStatus};
use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;

pub mod memory;
pub mod supabase;

pub use memory::InMemorySaleStore;
pub use supabase::SupabaseStore;

/// Errors returned by a [`SaleStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: RecordId },
    #[error("sale {id} is {status}; emission already in progress or completed")]
    Conflict { id: RecordId, status: SaleStatus },
    #[error("store request failed: {0}")]
    Backend(String),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Partial update applied to a sale row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaleUpdate {
    Issued {
        rps_number: RpsNumber,
        nfse: IssuedNfse,
    },
    Failed {
        message: String,
    },
}

impl SaleUpdate {
    pub fn status(&self) -> SaleStatus {
        match self {
            SaleUpdate::Issued { .. } => SaleStatus::Issued,
            SaleUpdate::Failed { .. } => SaleStatus::Error,
        }
    }

    /// The column patch sent to the store.
    ///
    /// Success clears `error_message`; failure leaves fiscal fields alone.
    pub fn to_patch(&self) -> Value {
        match self {
            SaleUpdate::Issued { rps_number, nfse } => json!({
                "status": SaleStatus::Issued,
                "rps_number": rps_number.value(),
                "nfs_number": nfse.nfs_number,
                "verification_code": nfse.verification_code,
                "issue_date": nfse.issue_date,
                "nfs_link_pdf": nfse.pdf_link,
                "error_message": null,
            }),
            SaleUpdate::Failed { message } => json!({
                "status": SaleStatus::Error,
                "error_message": message,
            }),
        }
    }

    /// Apply this update to an in-memory row.
    pub fn apply(&self, sale: &mut Sale) {
        sale.status = self.status();
        match self {
            SaleUpdate::Issued { rps_number, nfse } => {
                sale.rps_number = Some(rps_number.value());
                sale.nfs_number = Some(nfse.nfs_number.clone());
                sale.verification_code = Some(nfse.verification_code.clone());
                sale.issue_date = Some(nfse.issue_date.clone());
                sale.pdf_link = nfse.pdf_link.clone();
                sale.error_message = None;
            }
            SaleUpdate::Failed { message } => {
                sale.error_message = Some(message.clone());
            }
        }
    }
}

/// Read and update access to the `sales` and `clients` tables.
#[async_trait]
pub trait SaleStore: Send + Sync {
    /// Move the sale to Processing if it is Pending or Error.
    ///
    /// Returns the sale as it was read before the transition. Any other
    /// status yields [`StoreError::Conflict`] and leaves the row untouched.
    async fn begin_processing(&self, sale_id: &RecordId) -> Result<Sale, StoreError>;

    async fn fetch_sale(&self, sale_id: &RecordId) -> Result<Sale, StoreError>;

    async fn fetch_client(&self, client_id: &RecordId) -> Result<Client, StoreError>;

    async fn update_sale(&self, sale_id: &RecordId, update: &SaleUpdate) -> Result<(), StoreError>;
}
