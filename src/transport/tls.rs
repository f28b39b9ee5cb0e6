//! Mutual TLS for broker connections.
//!
//! The broker certificate is verified against the configured CA only (no
//! system roots), and the client always presents its own certificate chain
//! and key.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::ClientConfig;
use rustls::RootCertStore;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::{debug, info, warn};

use crate::utils::{Error, Result};

/// Certificate material for a mutual-TLS connection, all PEM files.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TlsSettings {
    pub ca_cert: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
}

impl TlsSettings {
    pub fn new(
        ca_cert: impl Into<PathBuf>,
        client_cert: impl Into<PathBuf>,
        client_key: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ca_cert: ca_cert.into(),
            client_cert: client_cert.into(),
            client_key: client_key.into(),
        }
    }

    /// Reads the certificate files and builds the rustls client config.
    /// Every failure here is an `Auth` error.
    pub fn client_config(&self) -> Result<Arc<ClientConfig>> {
        let mut roots = RootCertStore::empty();
        let ca_certs = load_certs(&self.ca_cert)?;
        for cert in ca_certs {
            roots.add(cert).map_err(|e| {
                Error::auth(format!(
                    "invalid CA certificate in {}: {e}",
                    self.ca_cert.display()
                ))
            })?;
        }

        let chain = load_certs(&self.client_cert)?;
        let key = load_private_key(&self.client_key)?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::auth(format!("TLS configuration error: {e}")))?
            .with_root_certificates(roots)
            .with_client_auth_cert(chain, key)
            .map_err(|e| Error::auth(format!("client certificate rejected: {e}")))?;

        Ok(Arc::new(config))
    }
}

/// Runs the TLS handshake over an established TCP stream.
pub async fn handshake(
    config: Arc<ClientConfig>,
    host: &str,
    stream: TcpStream,
) -> Result<TlsStream<TcpStream>> {
    let server_name = ServerName::try_from(host)
        .map_err(|e| Error::auth(format!("invalid server name '{host}': {e}")))?
        .to_owned();

    debug!("Starting TLS handshake with {host}");
    match TlsConnector::from(config).connect(server_name, stream).await {
        Ok(tls) => {
            info!("TLS handshake with {host} completed");
            Ok(tls)
        }
        Err(e) => {
            warn!("TLS handshake with {host} failed: {e}");
            Err(Error::auth(format!("TLS handshake failed: {e}")))
        }
    }
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| Error::auth(format!("cannot read {}: {e}", path.display())))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::auth(format!("cannot parse {}: {e}", path.display())))?;

    if certs.is_empty() {
        return Err(Error::auth(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    debug!("Loaded {} certificates from {}", certs.len(), path.display());
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::auth(format!("cannot parse {}: {e}", path.display())))?
        .ok_or_else(|| Error::auth(format!("no private key found in {}", path.display())))
}
