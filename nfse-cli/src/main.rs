use anyhow::{Context, Result, bail};
use chrono::{DateTime, FixedOffset};
use clap::{Parser, Subcommand};
use nfse_core::certificate::CertificateBundle;
use nfse_core::config::{Config, Issuer, StoreConfig};
use nfse_core::emission::Emitter;
use nfse_core::nfse::sign::{XmlSigner, verify};
use nfse_core::nfse::xml::{SIGNED_ELEMENT, ToXml};
use nfse_core::nfse::{
    Client, MonotonicRpsNumbers, RecordId, RpsBuilder, RpsNumber, RpsNumberSource, Sale,
};
use nfse_core::store::SupabaseStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "nfse")]
#[command(about = "Emit, build, sign and verify ABRASF 2.02 NFS-e documents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full emission for a stored sale and print the result as JSON.
    Emit {
        #[arg(long)]
        sale_id: String,
        #[arg(long)]
        client_id: String,
    },
    /// Render the unsigned GerarNfseEnvio document from sale and client JSON.
    Build {
        #[arg(long)]
        sale: PathBuf,
        #[arg(long)]
        client: PathBuf,
        #[arg(long, env = "PRESTADOR_CNPJ")]
        issuer_cnpj: String,
        #[arg(long, env = "PRESTADOR_IM")]
        issuer_im: String,
        #[arg(long)]
        rps_number: Option<u64>,
        /// RFC 3339 timestamp; defaults to now.
        #[arg(long)]
        issued_at: Option<String>,
        #[arg(long)]
        pretty: bool,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Sign the element with the given local name using the configured certificate.
    Sign {
        #[arg(long)]
        xml: PathBuf,
        #[arg(long, default_value = SIGNED_ELEMENT)]
        element: String,
        #[arg(long, env = "CERTIFICATE_BASE64", hide_env_values = true)]
        certificate: String,
        #[arg(long, env = "CERTIFICATE_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Check the enveloped signature of a document.
    Verify {
        #[arg(long)]
        xml: PathBuf,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("NFSE_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", path.display()))
}

fn write_output(output: Option<&Path>, contents: &str) -> Result<()> {
    match output {
        Some(path) => std::fs::write(path, contents)
            .with_context(|| format!("failed to write {}", path.display())),
        None => {
            println!("{contents}");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Emit { sale_id, client_id } => {
            let config = Config::from_env()?;
            let store = SupabaseStore::new(StoreConfig::from_env()?)?;
            let emitter = Emitter::new(config, Arc::new(store))?;
            let result = emitter
                .emit_invoice(&RecordId::new(sale_id), &RecordId::new(client_id))
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Build {
            sale,
            client,
            issuer_cnpj,
            issuer_im,
            rps_number,
            issued_at,
            pretty,
            output,
        } => {
            let sale: Sale = read_json(&sale)?;
            let client: Client = read_json(&client)?;
            let issuer = Issuer::new(issuer_cnpj, issuer_im);
            let rps_number = match rps_number {
                Some(value) => match RpsNumber::new(value) {
                    Some(number) => number,
                    None => bail!("rps number {value} is out of range"),
                },
                None => MonotonicRpsNumbers::new().next_number(),
            };

            let mut builder = RpsBuilder::new(&sale, &client, &issuer, rps_number);
            if let Some(raw) = issued_at {
                let timestamp = DateTime::<FixedOffset>::parse_from_rfc3339(&raw)
                    .with_context(|| format!("invalid --issued-at {raw}"))?;
                builder = builder.issued_at(timestamp);
            }
            let document = builder.build()?;
            let xml = if pretty {
                document.to_xml_pretty()?
            } else {
                document.to_xml()?
            };
            write_output(output.as_deref(), &xml)?;
        }
        Commands::Sign {
            xml,
            element,
            certificate,
            password,
            output,
        } => {
            let unsigned = std::fs::read_to_string(&xml)
                .with_context(|| format!("failed to read {}", xml.display()))?;
            let bundle = CertificateBundle::from_base64(&certificate, &password)?;
            let signed = XmlSigner::new(&bundle).sign(&unsigned, &element)?;
            write_output(output.as_deref(), &signed)?;
        }
        Commands::Verify { xml } => {
            let signed = std::fs::read_to_string(&xml)
                .with_context(|| format!("failed to read {}", xml.display()))?;
            let verified = verify(&signed)?;
            println!("OK {}", verified.reference_id);
        }
    }

    Ok(())
}
