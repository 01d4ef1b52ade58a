use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use url::Url;
use x509_parser::prelude::*;

use super::types::{CertificateInfo, HttpMethod};

/// One HTTP round trip as the uptime checker sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: Vec<(&'static str, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Raw `Location` header, if present
    pub location: Option<String>,
}

/// Sends a single request without following redirects
#[async_trait::async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// HTTP client backed by reqwest. Redirects are surfaced, never followed.
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(timeout_seconds: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Head => reqwest::Method::HEAD,
        };

        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }

        let response = builder.send().await?;
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        Ok(HttpResponse { status: response.status().as_u16(), location })
    }
}

/// Obtains the leaf certificate of a TLS endpoint
#[async_trait::async_trait]
pub trait CertificateFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<CertificateInfo>;
}

/// Connects with rustls against the webpki root store. A certificate that
/// fails chain, hostname or validity verification fails the handshake.
pub struct TlsCertificateFetcher {
    connector: TlsConnector,
    timeout_duration: Duration,
}

impl TlsCertificateFetcher {
    pub fn new(timeout_seconds: u64) -> Result<Self> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            timeout_duration: Duration::from_secs(timeout_seconds),
        })
    }
}

#[async_trait::async_trait]
impl CertificateFetcher for TlsCertificateFetcher {
    async fn fetch(&self, url: &Url) -> Result<CertificateInfo> {
        let host = url.host_str().ok_or_else(|| anyhow!("URL has no host: {}", url))?;
        let port = url.port_or_known_default().unwrap_or(443);
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| anyhow!("Invalid server name '{}': {}", host, e))?;

        let handshake = async {
            let stream = TcpStream::connect((host, port)).await?;
            self.connector.connect(server_name, stream).await
        };

        let tls = timeout(self.timeout_duration, handshake)
            .await
            .map_err(|_| anyhow!("TLS handshake with {}:{} timed out", host, port))??;

        let (_, session) = tls.get_ref();
        let leaf = session
            .peer_certificates()
            .and_then(|chain| chain.first())
            .ok_or_else(|| anyhow!("Peer presented no certificate"))?;

        parse_certificate_info(leaf.as_ref())
    }
}

/// Extract the validity window from a DER encoded certificate
pub fn parse_certificate_info(der: &[u8]) -> Result<CertificateInfo> {
    let (_rem, x509) = X509Certificate::from_der(der).context("Failed to parse certificate")?;
    let validity = x509.validity();

    Ok(CertificateInfo {
        valid_from: asn1_to_utc(validity.not_before)?,
        valid_to: asn1_to_utc(validity.not_after)?,
    })
}

fn asn1_to_utc(time: ASN1Time) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(time.timestamp(), 0)
        .ok_or_else(|| anyhow!("Certificate timestamp out of range: {}", time))
}
