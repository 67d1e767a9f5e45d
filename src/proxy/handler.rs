//! Proxy request handler with trigger-driven rotation
//!
//! Every client request is forwarded to the target through the currently active forward-proxy.
//! The upstream response is captured in a [`ResponseBuffer`]; when its status is a trigger code
//! the handler advances the shared rotation and replays the request, at most once per proxy.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::request::Parts;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::{Request, Response, StatusCode};
use tokio_rustls::TlsConnector;
use tracing::{error, info, instrument, warn};

use crate::error::{RelayError, Result};
use crate::models::Target;
use crate::proxy::buffer::{ClientResponse, ResponseBuffer, ResponseSink};
use crate::proxy::rewrite;
use crate::proxy::rotation::ProxyRotation;
use crate::proxy::transport::{self, ForwardTransport};
use crate::proxy::trigger::TriggerSet;

/// Configuration for proxy handler
#[derive(Debug, Clone)]
pub struct ProxyHandlerConfig {
    /// Timeout for establishing the connection path through a proxy
    pub connect_timeout: Duration,
    /// Timeout for one upstream exchange, response body included
    pub request_timeout: Duration,
    /// Whether captured upstream headers are relayed to the client
    pub relay_headers: bool,
}

impl Default for ProxyHandlerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: transport::DEFAULT_CONNECT_TIMEOUT,
            request_timeout: Duration::from_secs(60),
            relay_headers: false,
        }
    }
}

/// Proxy request handler
pub struct ProxyHandler {
    target: Arc<Target>,
    rotation: Arc<ProxyRotation>,
    triggers: Arc<TriggerSet>,
    config: ProxyHandlerConfig,
    tls: TlsConnector,
}

impl ProxyHandler {
    pub fn new(
        target: Arc<Target>,
        rotation: Arc<ProxyRotation>,
        triggers: Arc<TriggerSet>,
        config: ProxyHandlerConfig,
    ) -> Result<Self> {
        Ok(Self {
            target,
            rotation,
            triggers,
            config,
            tls: transport::tls_connector()?,
        })
    }

    pub fn rotation(&self) -> &Arc<ProxyRotation> {
        &self.rotation
    }

    /// Handle an incoming client request
    #[instrument(skip(self, req), fields(method = %req.method(), uri = %req.uri()))]
    pub async fn handle<B>(&self, req: Request<B>, client_addr: SocketAddr) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes>,
        B::Error: fmt::Display,
    {
        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                let err = RelayError::InvalidRequest(format!("Failed to read body: {}", e));
                warn!(client = %client_addr, "{}", err);
                return self.error_response(err.status_code(), &err.to_string());
            }
        };

        let buffer = self.dispatch(&parts, body, Some(client_addr.ip())).await;

        let mut sink = ClientResponse::new();
        buffer.flush(&mut sink, self.config.relay_headers);
        sink.into_response()
    }

    /// Run the retry loop for one request and return the captured final response.
    ///
    /// The result is the first non-trigger response, or the last response once every proxy
    /// has been tried.
    pub async fn dispatch(
        &self,
        parts: &Parts,
        body: Bytes,
        client_ip: Option<IpAddr>,
    ) -> ResponseBuffer {
        let mut buffer = ResponseBuffer::new();
        let mut retries = 0;
        let mut proxy = self.rotation.current();

        loop {
            let transport = ForwardTransport::new(
                proxy.clone(),
                self.config.connect_timeout,
                self.tls.clone(),
            );
            self.forward(&transport, parts, body.clone(), client_ip, &mut buffer)
                .await;

            let status = buffer.status();
            if !self.triggers.matches(status) {
                break;
            }

            warn!(
                proxy = %proxy,
                status,
                attempt = retries + 1,
                "Trigger status received through proxy"
            );

            retries += 1;
            if retries >= self.rotation.len() {
                warn!(attempts = retries, "All proxies returned a trigger status");
                break;
            }

            let (index, next) = self.rotation.advance_indexed();
            info!(proxy = %next, index, "Switching to the next proxy");
            proxy = next;

            buffer.reset();
        }

        if buffer.status() == StatusCode::BAD_GATEWAY.as_u16() {
            warn!(proxy = %proxy, "Bad gateway, it could be caused by the proxy server");
        }

        buffer
    }

    /// One attempt. Transport failures are captured as 502 with an empty body.
    async fn forward(
        &self,
        transport: &ForwardTransport,
        parts: &Parts,
        body: Bytes,
        client_ip: Option<IpAddr>,
        buffer: &mut ResponseBuffer,
    ) {
        let result = tokio::time::timeout(
            self.config.request_timeout,
            self.exchange(transport, parts, body, client_ip, buffer),
        )
        .await
        .unwrap_or(Err(RelayError::RequestTimeout));

        if let Err(e) = result {
            if e.is_upstream() {
                warn!(proxy = %transport.proxy(), error = %e, "Upstream request failed");
            } else {
                error!(proxy = %transport.proxy(), error = %e, "Could not forward request");
            }
            buffer.reset();
            buffer.set_status(e.status_code().as_u16());
        }
    }

    async fn exchange(
        &self,
        transport: &ForwardTransport,
        parts: &Parts,
        body: Bytes,
        client_ip: Option<IpAddr>,
        buffer: &mut ResponseBuffer,
    ) -> Result<()> {
        let request = rewrite::outbound_request(&self.target, parts, body, client_ip)?;
        let response = transport.round_trip(&self.target, request).await?;
        rewrite::copy_response(response, buffer).await
    }

    /// Create an error response
    fn error_response(&self, status: StatusCode, message: &str) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(Bytes::from(message.to_string())));
        *response.status_mut() = status;
        response
    }
}
