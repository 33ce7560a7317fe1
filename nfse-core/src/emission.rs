//! The emission pipeline: sale and client in, persisted fiscal status out.
use crate::api::{NfseClient, TransportError};
use crate::certificate::{CertificateBundle, CertificateError};
use crate::config::Config;
use crate::nfse::sign::{SigningError, XmlSigner};
use crate::nfse::xml::{SIGNED_ELEMENT, ToXml};
use crate::nfse::xml::parse::{NfseResponse, ParseError, RemoteMessage, join_messages, parse_response};
use crate::nfse::{
    DocumentError, EmissionResult, IssuedNfse, MonotonicRpsNumbers, RecordId, RpsBuilder,
    RpsNumber, RpsNumberSource, Sale, SaleStatus,
};
use crate::store::{SaleStore, SaleUpdate, StoreError};
use std::sync::Arc;
use thiserror::Error;

const UNEXPECTED_RESPONSE: &str = "unexpected webservice response";

/// Why an emission attempt failed.
///
/// The `Display` text is what gets stored in the sale's `error_message`.
#[derive(Debug, Error)]
pub enum EmissionError {
    #[error("{0}")]
    Configuration(String),
    #[error("{0}")]
    CertificateFormat(#[source] CertificateError),
    #[error("{0}")]
    CertificateContent(#[source] CertificateError),
    #[error(transparent)]
    Signature(#[from] SigningError),
    #[error(transparent)]
    Transport(TransportError),
    #[error("{}", join_messages(.messages))]
    RemoteFault { messages: Vec<RemoteMessage> },
    #[error("{0}")]
    Protocol(String),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Store(StoreError),
    #[error("sale {id} is {status}; emission already in progress or completed")]
    Conflict { id: RecordId, status: SaleStatus },
}

impl EmissionError {
    /// Only transport failures may succeed when tried again unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmissionError::Transport(_))
    }
}

impl From<CertificateError> for EmissionError {
    fn from(error: CertificateError) -> Self {
        match error {
            CertificateError::Configuration(_) => EmissionError::Configuration(error.to_string()),
            CertificateError::Format(_) => EmissionError::CertificateFormat(error),
            CertificateError::Content(_) => EmissionError::CertificateContent(error),
        }
    }
}

impl From<TransportError> for EmissionError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Envelope(_) => EmissionError::Protocol(error.to_string()),
            other => EmissionError::Transport(other),
        }
    }
}

impl From<ParseError> for EmissionError {
    fn from(error: ParseError) -> Self {
        EmissionError::Protocol(format!("{UNEXPECTED_RESPONSE}: {error}"))
    }
}

impl From<StoreError> for EmissionError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Conflict { id, status } => EmissionError::Conflict { id, status },
            other => EmissionError::Store(other),
        }
    }
}

/// Runs emissions against one configuration, store and webservice.
///
/// # Examples
/// ```rust,no_run
/// use nfse_core::config::{Config, StoreConfig};
/// use nfse_core::emission::Emitter;
/// use nfse_core::nfse::RecordId;
/// use nfse_core::store::SupabaseStore;
/// use std::sync::Arc;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let store = SupabaseStore::new(StoreConfig::from_env()?)?;
/// let emitter = Emitter::new(Config::from_env()?, Arc::new(store))?;
/// let result = emitter
///     .emit_invoice(&RecordId::new("42"), &RecordId::new("7"))
///     .await?;
/// println!("{:?}", result.nfs_number);
/// # Ok(())
/// # }
/// ```
pub struct Emitter {
    config: Config,
    store: Arc<dyn SaleStore>,
    client: NfseClient,
    numbers: Arc<dyn RpsNumberSource>,
}

impl Emitter {
    /// # Errors
    /// Returns [`EmissionError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: Config, store: Arc<dyn SaleStore>) -> Result<Self, EmissionError> {
        let client = NfseClient::new(&config)?;
        Ok(Self {
            config,
            store,
            client,
            numbers: Arc::new(MonotonicRpsNumbers::new()),
        })
    }

    /// Replace the receipt number source (monotonic by default).
    pub fn with_numbers(mut self, numbers: Arc<dyn RpsNumberSource>) -> Self {
        self.numbers = numbers;
        self
    }

    /// Emit the NFS-e for a sale and persist the outcome.
    ///
    /// The sale is moved to Processing first; every later failure is stored
    /// as status Error with the error's message before being returned.
    ///
    /// # Errors
    /// Returns [`EmissionError::Conflict`] when the sale is already being
    /// processed or was issued, and the error that stopped the pipeline
    /// otherwise.
    #[tracing::instrument(skip_all, fields(sale_id = %sale_id, client_id = %client_id))]
    pub async fn emit_invoice(
        &self,
        sale_id: &RecordId,
        client_id: &RecordId,
    ) -> Result<EmissionResult, EmissionError> {
        let sale = self.store.begin_processing(sale_id).await?;
        tracing::info!(status = %SaleStatus::Processing, "emission started");

        let rps_number = self.numbers.next_number();
        let nfse = match self.submit(&sale, client_id, rps_number).await {
            Ok(nfse) => nfse,
            Err(error) => {
                self.record_failure(sale_id, &error).await;
                return Err(error);
            }
        };

        let update = SaleUpdate::Issued {
            rps_number,
            nfse: nfse.clone(),
        };
        if let Err(error) = self.store.update_sale(sale_id, &update).await {
            // The invoice exists remotely; keep the fiscal data in the log.
            tracing::error!(
                error = %error,
                update = ?update,
                "issued NFS-e could not be persisted"
            );
            return Err(EmissionError::Store(error));
        }
        let result = EmissionResult::issued(rps_number, nfse);
        tracing::info!(
            status = %result.status,
            rps_number = %rps_number,
            nfs_number = result.nfs_number.as_deref().unwrap_or_default(),
            "NFS-e issued"
        );
        Ok(result)
    }

    async fn submit(
        &self,
        sale: &Sale,
        client_id: &RecordId,
        rps_number: RpsNumber,
    ) -> Result<IssuedNfse, EmissionError> {
        let client = self.store.fetch_client(client_id).await?;
        let document = RpsBuilder::new(sale, &client, self.config.issuer(), rps_number).build()?;
        let xml = document.to_xml().map_err(DocumentError::from)?;

        let signed = {
            let bundle = CertificateBundle::from_secrets(self.config.certificate())?;
            XmlSigner::new(&bundle).sign(&xml, SIGNED_ELEMENT)?
        };

        let soap = self.client.gerar_nfse(&signed).await?;
        match parse_response(&soap)? {
            NfseResponse::Issued(nfse) => Ok(nfse),
            NfseResponse::Rejected(messages) => {
                tracing::warn!(messages = %join_messages(&messages), "webservice rejected the RPS");
                Err(EmissionError::RemoteFault { messages })
            }
            NfseResponse::Fault(message) => {
                tracing::warn!(fault = %message, "webservice returned a SOAP fault");
                Err(EmissionError::RemoteFault {
                    messages: vec![message],
                })
            }
            NfseResponse::Unexpected => Err(EmissionError::Protocol(UNEXPECTED_RESPONSE.to_string())),
        }
    }

    async fn record_failure(&self, sale_id: &RecordId, error: &EmissionError) {
        let update = SaleUpdate::Failed {
            message: error.to_string(),
        };
        match self.store.update_sale(sale_id, &update).await {
            Ok(()) => tracing::info!(
                status = %SaleStatus::Error,
                error = %error,
                retryable = error.is_retryable(),
                "emission failed"
            ),
            Err(store_error) => tracing::error!(
                error = %store_error,
                emission_error = %error,
                "emission error could not be persisted"
            ),
        }
    }
}
