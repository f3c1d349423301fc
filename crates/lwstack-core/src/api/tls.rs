//! TLS client configuration and CA capture.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::TransportError;

fn provider() -> Arc<CryptoProvider> {
    Arc::new(ring::default_provider())
}

/// Parse every certificate in a PEM bundle.
pub fn load_pem_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    rustls_pemfile::certs(&mut BufReader::new(pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransportError::Tls(format!("invalid PEM: {}", e)))
}

/// Client config trusting the web PKI roots plus an optional CA bundle.
pub fn client_config(ca: Option<&Path>) -> Result<ClientConfig, TransportError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = ca {
        let pem = std::fs::read(path)
            .map_err(|e| TransportError::Tls(format!("read {}: {}", path.display(), e)))?;
        let certs = load_pem_certificates(&pem)?;
        let (added, ignored) = roots.add_parsable_certificates(certs);
        debug!(added, ignored, ca = %path.display(), "loaded CA bundle");
        if added == 0 {
            return Err(TransportError::Tls(format!(
                "no usable certificates in {}",
                path.display()
            )));
        }
    }

    Ok(ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth())
}

/// Accepts any server certificate. Only used to capture a CA chain.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Connect to `host:port` and return the certificate chain it presents,
/// PEM-encoded. The chain is not verified.
pub async fn fetch_ca_pem(host: &str, port: u16) -> Result<String, TransportError> {
    let provider = provider();
    let config = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
        .with_no_client_auth();

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| TransportError::InvalidAddress(format!("{}: {}", host, e)))?;
    let tcp = TcpStream::connect((host, port))
        .await
        .map_err(|e| TransportError::Tls(format!("connect {}:{}: {}", host, port, e)))?;
    let tls = TlsConnector::from(Arc::new(config))
        .connect(server_name, tcp)
        .await
        .map_err(|e| TransportError::Tls(format!("handshake with {}: {}", host, e)))?;

    let (_, session) = tls.get_ref();
    let chain = session
        .peer_certificates()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| TransportError::Tls(format!("{} presented no certificates", host)))?;

    // The last certificate of the chain is closest to the root.
    let mut pem = String::new();
    for cert in chain.iter().rev() {
        pem.push_str(&encode_pem(cert.as_ref()));
    }
    Ok(pem)
}

fn encode_pem(der: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(der);
    let mut out = String::from("-----BEGIN CERTIFICATE-----\n");
    for line in encoded.as_bytes().chunks(64) {
        out.push_str(&String::from_utf8_lossy(line));
        out.push('\n');
    }
    out.push_str("-----END CERTIFICATE-----\n");
    out
}
