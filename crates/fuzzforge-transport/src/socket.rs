//! HTTP/1.1 stream socket
//!
//! The engine renders complete request byte strings; the socket's job is to
//! send them verbatim and read back one framed response. Send/receive
//! failures never surface as errors: a timeout becomes the `599` pseudo
//! response and a closed or failed connection becomes `598`, both of which
//! the engine records as bugs.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::DigitallySignedStruct;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::response::HttpResponse;

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    120
}

/// Connection settings for the target service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    pub target_ip: String,
    pub target_port: u16,
    /// Host name used for SNI; defaults to the target ip
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_true")]
    pub use_ssl: bool,
    /// Fuzzing targets routinely present self-signed certificates
    #[serde(default = "default_true")]
    pub skip_cert_validation: bool,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub reconnect_on_every_request: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            target_ip: "127.0.0.1".to_string(),
            target_port: 443,
            host: None,
            use_ssl: true,
            skip_cert_validation: true,
            request_timeout_secs: default_timeout_secs(),
            reconnect_on_every_request: false,
        }
    }
}

impl ConnectionSettings {
    /// Per-request send+receive timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The name presented for SNI and certificate checks.
    pub fn server_name(&self) -> &str {
        self.host.as_deref().unwrap_or(&self.target_ip)
    }
}

/// Accepts any server certificate; fuzzing targets are rarely publicly
/// trusted and the original behavior is an unverified TLS context.
#[derive(Debug)]
struct NoCertificateVerification(rustls::crypto::CryptoProvider);

impl ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
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
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

enum FuzzStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl FuzzStream {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Self::Plain(s) => s.write_all(buf).await,
            Self::Tls(s) => s.write_all(buf).await,
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(s) => s.read(buf).await,
            Self::Tls(s) => s.read(buf).await,
        }
    }
}

/// One fuzzing worker's connection to the target
pub struct HttpSock {
    settings: ConnectionSettings,
    tls: Option<TlsConnector>,
    stream: Option<FuzzStream>,
}

impl HttpSock {
    /// Build a socket; TLS configuration happens here so pattern errors
    /// abort the run rather than a send.
    pub fn new(settings: ConnectionSettings) -> Result<Self> {
        let tls = if settings.use_ssl {
            Some(TlsConnector::from(Arc::new(build_tls_config(&settings)?)))
        } else {
            None
        };
        Ok(Self { settings, tls, stream: None })
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    async fn connect(&self) -> io::Result<FuzzStream> {
        let addr = format!("{}:{}", self.settings.target_ip, self.settings.target_port);
        let tcp = TcpStream::connect(&addr).await?;
        tcp.set_nodelay(true)?;
        match &self.tls {
            None => Ok(FuzzStream::Plain(tcp)),
            Some(connector) => {
                let name = ServerName::try_from(self.settings.server_name().to_string())
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                let stream = connector.connect(name, tcp).await?;
                Ok(FuzzStream::Tls(Box::new(stream)))
            }
        }
    }

    /// Send one rendered request and read one response.
    ///
    /// Never fails: transport problems come back as the `598`/`599`
    /// pseudo-code responses.
    pub async fn send_recv(&mut self, payload: &str) -> HttpResponse {
        let timeout = self.settings.request_timeout();

        if self.settings.reconnect_on_every_request || self.stream.is_none() {
            match tokio::time::timeout(timeout, self.connect()).await {
                Ok(Ok(stream)) => self.stream = Some(stream),
                Ok(Err(e)) => {
                    warn!(error = %e, "connection to target failed");
                    return HttpResponse::connection_closed();
                }
                Err(_) => {
                    warn!("connection to target timed out");
                    return HttpResponse::timeout();
                }
            }
        }

        let Some(stream) = self.stream.as_mut() else {
            return HttpResponse::connection_closed();
        };

        match tokio::time::timeout(timeout, exchange(stream, payload)).await {
            Ok(Ok(raw)) => HttpResponse::from_raw(raw),
            Ok(Err(e)) => {
                debug!(error = %e, "request exchange failed");
                self.stream = None;
                HttpResponse::connection_closed()
            }
            Err(_) => {
                self.stream = None;
                HttpResponse::timeout()
            }
        }
    }
}

fn build_tls_config(settings: &ConnectionSettings) -> Result<rustls::ClientConfig> {
    let provider = rustls::crypto::aws_lc_rs::default_provider();
    if settings.skip_cert_validation {
        let config = rustls::ClientConfig::builder_with_provider(provider.clone().into())
            .with_safe_default_protocol_versions()
            .map_err(|e| TransportError::Tls(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoCertificateVerification(provider)))
            .with_no_client_auth();
        Ok(config)
    } else {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = rustls::ClientConfig::builder_with_provider(provider.into())
            .with_safe_default_protocol_versions()
            .map_err(|e| TransportError::Tls(e.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(config)
    }
}

async fn exchange(stream: &mut FuzzStream, payload: &str) -> io::Result<String> {
    stream.write_all(payload.as_bytes()).await?;
    read_http_response(stream).await
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn header_value<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.split("\r\n").skip(1).find_map(|line| {
        let (n, v) = line.split_once(':')?;
        n.trim().eq_ignore_ascii_case(name).then(|| v.trim())
    })
}

fn body_forbidden(head: &str) -> bool {
    let code = head.split(' ').nth(1).unwrap_or("");
    code == "204" || code == "304" || code.starts_with('1')
}

async fn fill(stream: &mut FuzzStream, buf: &mut Vec<u8>) -> io::Result<usize> {
    let mut chunk = [0u8; 4096];
    let n = stream.read(&mut chunk).await?;
    buf.extend_from_slice(&chunk[..n]);
    Ok(n)
}

/// Read one response, framed by Content-Length, chunked encoding, the status
/// code, or connection close. Chunked bodies are decoded before returning.
async fn read_http_response(stream: &mut FuzzStream) -> io::Result<String> {
    let mut buf: Vec<u8> = Vec::with_capacity(4096);

    let header_end = loop {
        if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
            break pos;
        }
        if fill(stream, &mut buf).await? == 0 {
            if buf.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before any response bytes",
                ));
            }
            // Headers never completed; hand back what arrived.
            return Ok(String::from_utf8_lossy(&buf).into_owned());
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let body_start = header_end + 4;

    if let Some(len) = header_value(&head, "content-length").and_then(|v| v.parse::<usize>().ok())
    {
        let total = body_start + len;
        while buf.len() < total {
            if fill(stream, &mut buf).await? == 0 {
                break;
            }
        }
        buf.truncate(total.min(buf.len()));
        return Ok(String::from_utf8_lossy(&buf).into_owned());
    }

    if header_value(&head, "transfer-encoding")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"))
    {
        let body = read_chunked_body(stream, &mut buf, body_start).await?;
        return Ok(format!("{head}\r\n\r\n{body}"));
    }

    if body_forbidden(&head) {
        buf.truncate(body_start);
        return Ok(String::from_utf8_lossy(&buf).into_owned());
    }

    // No framing headers: the body is delimited by connection close.
    while fill(stream, &mut buf).await? > 0 {}
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

async fn read_chunked_body(
    stream: &mut FuzzStream,
    buf: &mut Vec<u8>,
    body_start: usize,
) -> io::Result<String> {
    let eof = || io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed mid-chunk");
    let mut pos = body_start;
    let mut body = String::new();

    loop {
        let line_end = loop {
            if let Some(rel) = find_subsequence(&buf[pos..], b"\r\n") {
                break pos + rel;
            }
            if fill(stream, buf).await? == 0 {
                return Err(eof());
            }
        };
        let size_line = String::from_utf8_lossy(&buf[pos..line_end]).into_owned();
        let size_hex = size_line.split(';').next().unwrap_or("").trim().to_string();
        let size = usize::from_str_radix(&size_hex, 16)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad chunk size"))?;

        let data_start = line_end + 2;
        let data_end = data_start + size;
        while buf.len() < data_end + 2 {
            if fill(stream, buf).await? == 0 {
                return Err(eof());
            }
        }
        if size == 0 {
            break;
        }
        body.push_str(&String::from_utf8_lossy(&buf[data_start..data_end]));
        pos = data_end + 2;
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_value_is_case_insensitive() {
        let head = "HTTP/1.1 200 OK\r\nContent-Length: 12\r\nX-Extra: a";
        assert_eq!(header_value(head, "content-length"), Some("12"));
        assert_eq!(header_value(head, "CONTENT-LENGTH"), Some("12"));
        assert_eq!(header_value(head, "missing"), None);
    }

    #[test]
    fn test_body_forbidden_codes() {
        assert!(body_forbidden("HTTP/1.1 204 No Content"));
        assert!(body_forbidden("HTTP/1.1 304 Not Modified"));
        assert!(body_forbidden("HTTP/1.1 100 Continue"));
        assert!(!body_forbidden("HTTP/1.1 200 OK"));
    }

    #[tokio::test]
    async fn test_send_recv_against_local_server() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.expect("accept");
            let mut buf = [0u8; 1024];
            let _ = conn.read(&mut buf).await;
            conn.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                .await
                .expect("write");
        });

        let settings = ConnectionSettings {
            target_ip: addr.ip().to_string(),
            target_port: addr.port(),
            use_ssl: false,
            request_timeout_secs: 5,
            ..Default::default()
        };
        let mut sock = HttpSock::new(settings).expect("sock");
        let response = sock.send_recv("GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert_eq!(response.status_code(), Some("200"));
        assert_eq!(response.body(), Some("ok"));
    }

    #[tokio::test]
    async fn test_unreachable_target_maps_to_connection_closed() {
        let settings = ConnectionSettings {
            target_ip: "127.0.0.1".to_string(),
            // Reserved port that nothing listens on in the test environment.
            target_port: 1,
            use_ssl: false,
            request_timeout_secs: 2,
            ..Default::default()
        };
        let mut sock = HttpSock::new(settings).expect("sock");
        let response = sock.send_recv("GET / HTTP/1.1\r\n\r\n").await;
        assert_eq!(response.status_code(), Some(crate::response::CONNECTION_CLOSED_CODE));
    }

    #[tokio::test]
    async fn test_chunked_body_is_decoded() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.expect("accept");
            let mut buf = [0u8; 1024];
            let _ = conn.read(&mut buf).await;
            conn.write_all(
                b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nwiki\r\n5\r\npedia\r\n0\r\n\r\n",
            )
            .await
            .expect("write");
        });

        let settings = ConnectionSettings {
            target_ip: addr.ip().to_string(),
            target_port: addr.port(),
            use_ssl: false,
            request_timeout_secs: 5,
            ..Default::default()
        };
        let mut sock = HttpSock::new(settings).expect("sock");
        let response = sock.send_recv("GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert_eq!(response.body(), Some("wikipedia"));
    }
}
