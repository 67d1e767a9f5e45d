//! Dialing a target host through a forward-proxy
//!
//! HTTP proxies get a `CONNECT` tunnel, SOCKS5 proxies a SOCKS5 connect. Plain TCP to the
//! proxy itself is used for absolute-form HTTP forwarding. `https` proxies are reached over TLS
//! before anything else is sent.

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tokio_socks::tcp::Socks5Stream;
use tracing::debug;

use crate::error::{RelayError, Result};
use crate::models::{format_host_port, ProxyEndpoint, ProxyProtocol};

/// Largest CONNECT response head accepted from a proxy
const MAX_CONNECT_RESPONSE: usize = 8 * 1024;

/// Byte stream an HTTP exchange can run over
pub trait ProxyConnection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> ProxyConnection for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Open a connection to the proxy itself, TLS-wrapped for `https` proxies
pub async fn connect_to_proxy(
    proxy: &ProxyEndpoint,
    tls: &TlsConnector,
) -> Result<Box<dyn ProxyConnection>> {
    let addr = proxy.addr();
    debug!(proxy = %proxy, "Connecting to proxy");
    let stream = TcpStream::connect(&addr).await.map_err(|e| {
        RelayError::ProxyConnectionFailed(format!("TCP connect to {} failed: {}", addr, e))
    })?;

    let stream: Box<dyn ProxyConnection> = match proxy.protocol {
        ProxyProtocol::Https => Box::new(tls_handshake(tls, stream, &proxy.host).await?),
        ProxyProtocol::Http | ProxyProtocol::Socks5 => Box::new(stream),
    };
    Ok(stream)
}

/// Open a byte tunnel to `host:port` through the proxy
pub async fn tunnel_through(
    proxy: &ProxyEndpoint,
    tls: &TlsConnector,
    host: &str,
    port: u16,
) -> Result<Box<dyn ProxyConnection>> {
    let target = format_host_port(host, port);

    match proxy.protocol {
        ProxyProtocol::Http | ProxyProtocol::Https => {
            let stream = connect_to_proxy(proxy, tls).await?;
            let stream = connect_via_http_proxy(stream, proxy, host, port)
                .await
                .map_err(|e| match e.downcast::<RelayError>() {
                    Ok(relay) => relay,
                    Err(e) => RelayError::ProxyConnectionFailed(format!(
                        "HTTP proxy tunnel failed ({} -> {}): {}",
                        proxy, target, e
                    )),
                })?;
            Ok(stream)
        }
        ProxyProtocol::Socks5 => {
            let stream = connect_via_socks5_proxy(proxy, host, port)
                .await
                .map_err(|e| {
                    RelayError::ProxyConnectionFailed(format!(
                        "SOCKS5 proxy tunnel failed ({} -> {}): {}",
                        proxy, target, e
                    ))
                })?;
            let stream: Box<dyn ProxyConnection> = Box::new(stream);
            Ok(stream)
        }
    }
}

/// Run a TLS client handshake over `stream`, verifying the certificate against `host`
pub async fn tls_handshake<S: ProxyConnection>(
    tls: &TlsConnector,
    stream: S,
    host: &str,
) -> Result<TlsStream<S>> {
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| RelayError::Tls(format!("Invalid server name {}: {}", host, e)))?;

    let stream = tls
        .connect(server_name, stream)
        .await
        .map_err(|e| RelayError::Tls(format!("Handshake with {} failed: {}", host, e)))?;

    debug!(host = %host, "TLS session established");
    Ok(stream)
}

async fn connect_via_http_proxy<S: ProxyConnection>(
    mut stream: S,
    proxy: &ProxyEndpoint,
    target_host: &str,
    target_port: u16,
) -> std::result::Result<S, anyhow::Error> {
    let authority = format_host_port(target_host, target_port);
    let mut request = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n", authority, authority);

    if let Some(auth) = proxy.basic_auth() {
        request.push_str(&format!("Proxy-Authorization: {}\r\n", auth));
    }

    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await?;

    // Read the response head byte-wise so nothing past the blank line is consumed
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            if head.is_empty() {
                anyhow::bail!("empty CONNECT response");
            }
            anyhow::bail!("CONNECT response truncated");
        }
        head.push(byte[0]);
        if head.len() > MAX_CONNECT_RESPONSE {
            anyhow::bail!("CONNECT response head too large");
        }
    }

    let head = String::from_utf8_lossy(&head);
    let status_line = head.lines().next().unwrap_or("Unknown error");
    if !is_connect_success(status_line) {
        return Err(RelayError::ConnectFailed(status_line.to_string()).into());
    }

    debug!(proxy = %proxy, target = %authority, "HTTP CONNECT tunnel established");
    Ok(stream)
}

async fn connect_via_socks5_proxy(
    proxy: &ProxyEndpoint,
    target_host: &str,
    target_port: u16,
) -> std::result::Result<TcpStream, anyhow::Error> {
    let socket = TcpStream::connect(proxy.addr()).await?;

    let stream = match (&proxy.username, &proxy.password) {
        (Some(username), Some(password)) => {
            Socks5Stream::connect_with_password_and_socket(
                socket,
                (target_host, target_port),
                username,
                password,
            )
            .await?
        }
        _ => Socks5Stream::connect_with_socket(socket, (target_host, target_port)).await?,
    };

    debug!(proxy = %proxy, "SOCKS5 tunnel established");
    Ok(stream.into_inner())
}

fn is_connect_success(status_line: &str) -> bool {
    let mut parts = status_line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) => {
            version.starts_with("HTTP/1.") && code.len() == 3 && code.starts_with('2')
        }
        _ => false,
    }
}
