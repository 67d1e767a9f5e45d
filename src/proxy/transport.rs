//! Forwarding transport bound to one forward-proxy
//!
//! A transport establishes the connection path to the target through its proxy and runs a
//! single HTTP/1.1 exchange over it:
//! - http(s) proxy, http target: request in absolute form straight to the proxy
//! - http(s) proxy, https target: CONNECT tunnel, then TLS
//! - socks5 proxy: SOCKS5 tunnel, then TLS for https targets

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, PROXY_AUTHORIZATION};
use hyper::{Request, Response, Uri};
use hyper_util::rt::TokioIo;
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument};

use crate::error::{RelayError, Result};
use crate::models::{ProxyEndpoint, Target};
use crate::proxy::egress::{self, ProxyConnection};

/// Default bound on connection establishment
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// TLS client configuration for https targets, trusting the webpki root set
pub fn tls_connector() -> Result<TlsConnector> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| RelayError::Tls(e.to_string()))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Transport whose outbound connections go through a single proxy
#[derive(Clone)]
pub struct ForwardTransport {
    proxy: Arc<ProxyEndpoint>,
    connect_timeout: Duration,
    tls: TlsConnector,
}

impl ForwardTransport {
    pub fn new(proxy: Arc<ProxyEndpoint>, connect_timeout: Duration, tls: TlsConnector) -> Self {
        Self {
            proxy,
            connect_timeout,
            tls,
        }
    }

    pub fn proxy(&self) -> &Arc<ProxyEndpoint> {
        &self.proxy
    }

    /// Send `request` (absolute URI, `Host` already set) to the target and return the
    /// response head with its still-unread body.
    #[instrument(skip(self, target, request), fields(proxy = %self.proxy, uri = %request.uri()))]
    pub async fn round_trip(
        &self,
        target: &Target,
        mut request: Request<Full<Bytes>>,
    ) -> Result<Response<Incoming>> {
        let (stream, absolute_form) =
            tokio::time::timeout(self.connect_timeout, self.establish(target))
                .await
                .map_err(|_| RelayError::Timeout)??;

        if absolute_form {
            if let Some(auth) = self.proxy.basic_auth() {
                let value = HeaderValue::from_str(&auth).map_err(|e| {
                    RelayError::InvalidRequest(format!("Invalid proxy credentials: {}", e))
                })?;
                request.headers_mut().insert(PROXY_AUTHORIZATION, value);
            }
        } else {
            *request.uri_mut() = origin_form(request.uri())?;
        }

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| RelayError::ProxyConnectionFailed(format!("Handshake failed: {}", e)))?;

        // Spawn connection handler
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Upstream connection ended: {}", e);
            }
        });

        sender
            .send_request(request)
            .await
            .map_err(|e| RelayError::Http(format!("Request failed: {}", e)))
    }

    /// Returns the stream and whether the request must be sent in absolute form
    async fn establish(&self, target: &Target) -> Result<(Box<dyn ProxyConnection>, bool)> {
        if self.proxy.protocol.is_http() && !target.is_tls() {
            let stream = egress::connect_to_proxy(&self.proxy, &self.tls).await?;
            return Ok((stream, true));
        }

        let tunnel =
            egress::tunnel_through(&self.proxy, &self.tls, target.host(), target.port()).await?;
        if !target.is_tls() {
            return Ok((tunnel, false));
        }

        let stream: Box<dyn ProxyConnection> =
            Box::new(egress::tls_handshake(&self.tls, tunnel, target.host()).await?);
        Ok((stream, false))
    }
}

fn origin_form(uri: &Uri) -> Result<Uri> {
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    path.parse::<Uri>()
        .map_err(|e| RelayError::InvalidRequest(format!("Invalid request path {}: {}", path, e)))
}
