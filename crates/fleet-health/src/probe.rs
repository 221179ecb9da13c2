//! Relay reachability probes.
//!
//! A probe is a `GET {api_url}/server` against the relay's management API.
//! Any 2xx answer counts as reachable. Everything else (refused connection,
//! failed TLS handshake, non-2xx status, timeout) is unreachable, with a
//! short reason that ends up in the alert.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HOST, USER_AGENT};
use http::{Method, Request, Uri};
use http_body_util::Empty;
use hyper_util::rt::TokioIo;
use rustls::ClientConfig;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use fleet_state::ServerRecord;

use crate::tls;

/// Boxed future returned by the monitor's pluggable seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

const PROBE_USER_AGENT: &str = concat!("fleet-health/", env!("CARGO_PKG_VERSION"));

/// Result of probing one server once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    Reachable,
    Unreachable(String),
}

impl ProbeResult {
    pub fn unreachable(reason: impl Into<String>) -> Self {
        ProbeResult::Unreachable(reason.into())
    }

    pub fn is_reachable(&self) -> bool {
        matches!(self, ProbeResult::Reachable)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ProbeResult::Reachable => None,
            ProbeResult::Unreachable(reason) => Some(reason),
        }
    }
}

/// Checks whether a relay is reachable.
pub trait Prober: Send + Sync {
    fn probe<'a>(&'a self, server: &'a ServerRecord) -> BoxFuture<'a, ProbeResult>;
}

/// Run `prober` against `server`, giving up after `timeout`.
pub async fn probe_with_timeout(
    prober: &dyn Prober,
    server: &ServerRecord,
    timeout: Duration,
) -> ProbeResult {
    match tokio::time::timeout(timeout, prober.probe(server)).await {
        Ok(result) => result,
        Err(_) => {
            debug!(server_id = server.id, ?timeout, "health probe timed out");
            ProbeResult::unreachable(format!("probe timed out after {timeout:?}"))
        }
    }
}

// ── HTTP(S) prober ─────────────────────────────────────────────────

/// Probes the relay management API over HTTP/1.1, with TLS for `https` URLs.
///
/// Servers with a recorded certificate fingerprint are pinned to it;
/// others are verified against the Mozilla root store.
#[derive(Clone)]
pub struct HttpProber {
    webpki: Arc<ClientConfig>,
}

impl HttpProber {
    pub fn new() -> Result<Self, rustls::Error> {
        Ok(Self {
            webpki: tls::webpki_config()?,
        })
    }

    async fn probe_server(&self, server: &ServerRecord) -> ProbeResult {
        let target = match Target::parse(&server.api_url) {
            Ok(target) => target,
            Err(reason) => return ProbeResult::Unreachable(reason),
        };

        let stream = match TcpStream::connect((target.host.as_str(), target.port)).await {
            Ok(stream) => stream,
            Err(e) => {
                debug!(server_id = server.id, error = %e, "health probe connection failed");
                return ProbeResult::unreachable(format!("connect failed: {e}"));
            }
        };

        if !target.tls {
            return send_request(stream, &target).await;
        }

        let config = match server.cert_sha256.as_deref() {
            Some(fingerprint) => match tls::pinned_config(fingerprint) {
                Ok(config) => config,
                Err(e) => return ProbeResult::unreachable(format!("tls handshake failed: {e}")),
            },
            None => self.webpki.clone(),
        };
        let name = match ServerName::try_from(target.host.clone()) {
            Ok(name) => name,
            Err(e) => return ProbeResult::unreachable(format!("invalid api url: {e}")),
        };

        match TlsConnector::from(config).connect(name, stream).await {
            Ok(tls_stream) => send_request(tls_stream, &target).await,
            Err(e) => {
                debug!(server_id = server.id, error = %e, "health probe tls handshake failed");
                ProbeResult::unreachable(format!("tls handshake failed: {e}"))
            }
        }
    }
}

impl Prober for HttpProber {
    fn probe<'a>(&'a self, server: &'a ServerRecord) -> BoxFuture<'a, ProbeResult> {
        Box::pin(self.probe_server(server))
    }
}

/// Where a probe goes, resolved from a server's `api_url`.
#[derive(Debug, PartialEq, Eq)]
struct Target {
    tls: bool,
    host: String,
    port: u16,
    /// Value for the `Host` header.
    authority: String,
    /// Request path, `{base}/server`.
    path: String,
}

impl Target {
    fn parse(api_url: &str) -> Result<Self, String> {
        let uri: Uri = api_url
            .parse()
            .map_err(|e| format!("invalid api url: {e}"))?;

        let tls = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            Some(other) => return Err(format!("invalid api url: unsupported scheme {other}")),
            None => return Err("invalid api url: missing scheme".to_string()),
        };
        let authority = uri
            .authority()
            .ok_or_else(|| "invalid api url: missing host".to_string())?;
        let host = authority
            .host()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = authority.port_u16().unwrap_or(if tls { 443 } else { 80 });

        Ok(Self {
            tls,
            host,
            port,
            authority: authority.as_str().to_string(),
            path: format!("{}/server", uri.path().trim_end_matches('/')),
        })
    }
}

async fn send_request<S>(io: S, target: &Target) -> ProbeResult
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = match hyper::client::conn::http1::handshake(TokioIo::new(io)).await {
        Ok(pair) => pair,
        Err(e) => return ProbeResult::unreachable(format!("http handshake failed: {e}")),
    };

    // Drive the connection in the background.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "health probe connection closed");
        }
    });

    let request = Request::builder()
        .method(Method::GET)
        .uri(target.path.as_str())
        .header(HOST, target.authority.as_str())
        .header(USER_AGENT, PROBE_USER_AGENT)
        .body(Empty::<Bytes>::new());
    let request = match request {
        Ok(request) => request,
        Err(e) => return ProbeResult::unreachable(format!("invalid api url: {e}")),
    };

    match sender.send_request(request).await {
        Ok(resp) if resp.status().is_success() => ProbeResult::Reachable,
        Ok(resp) => {
            debug!(status = %resp.status(), path = %target.path, "health probe non-2xx");
            ProbeResult::unreachable(format!("http status {}", resp.status().as_u16()))
        }
        Err(e) => ProbeResult::unreachable(format!("request failed: {e}")),
    }
}
