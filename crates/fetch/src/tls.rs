use std::sync::Arc;
use std::time::Instant;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme, SupportedProtocolVersion};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use siteaudit_core::CrawlError;

/// Raw-handshake TLS facts for one origin. Out-of-band like the DNS probe;
/// certificate verification is disabled so broken chains still report.
#[derive(Debug, Clone)]
pub struct TlsProbe {
    pub host: String,
    pub negotiated_protocol: Option<String>,
    pub negotiated_cipher: Option<String>,
    pub tls12_supported: bool,
    pub tls13_supported: bool,
    pub certificate_chain_len: usize,
    pub leaf_certificate_bytes: usize,
    pub handshake_ms: u64,
}

pub async fn probe(host: &str, port: u16) -> Result<TlsProbe, CrawlError> {
    let started = Instant::now();
    let negotiated = handshake(host, port, rustls::ALL_VERSIONS).await?;
    let handshake_ms = started.elapsed().as_millis() as u64;
    let tls13 = handshake(host, port, &[&rustls::version::TLS13]).await.is_ok();
    let tls12 = handshake(host, port, &[&rustls::version::TLS12]).await.is_ok();
    debug!(host, tls12, tls13, protocol = ?negotiated.protocol, "tls probe");
    Ok(TlsProbe {
        host: host.to_string(),
        negotiated_protocol: negotiated.protocol,
        negotiated_cipher: negotiated.cipher,
        tls12_supported: tls12,
        tls13_supported: tls13,
        certificate_chain_len: negotiated.chain_len,
        leaf_certificate_bytes: negotiated.leaf_bytes,
        handshake_ms,
    })
}

struct Handshake {
    protocol: Option<String>,
    cipher: Option<String>,
    chain_len: usize,
    leaf_bytes: usize,
}

async fn handshake(
    host: &str,
    port: u16,
    versions: &[&'static SupportedProtocolVersion],
) -> Result<Handshake, CrawlError> {
    let provider = Arc::new(ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(versions)
        .map_err(|e| CrawlError::Network(format!("tls config: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerify(provider)))
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));
    let tcp = TcpStream::connect((host, port))
        .await
        .map_err(|e| CrawlError::Network(format!("connect {host}:{port}: {e}")))?;
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| CrawlError::InvalidUrl(format!("sni {host}: {e}")))?;
    let stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| CrawlError::Network(format!("handshake {host}: {e}")))?;
    let (_, conn) = stream.get_ref();
    let chain = conn.peer_certificates().unwrap_or_default();
    Ok(Handshake {
        protocol: conn.protocol_version().map(protocol_name),
        cipher: conn
            .negotiated_cipher_suite()
            .map(|suite| format!("{:?}", suite.suite())),
        chain_len: chain.len(),
        leaf_bytes: chain.first().map(|cert| cert.len()).unwrap_or(0),
    })
}

fn protocol_name(version: rustls::ProtocolVersion) -> String {
    match version {
        rustls::ProtocolVersion::TLSv1_2 => "TLS 1.2".to_string(),
        rustls::ProtocolVersion::TLSv1_3 => "TLS 1.3".to_string(),
        other => format!("{other:?}"),
    }
}

/// Accepts every certificate; the probe reports what it saw rather than
/// failing on chains a browser would reject.
#[derive(Debug)]
struct NoVerify(Arc<CryptoProvider>);

impl ServerCertVerifier for NoVerify {
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
