//! Local stand-ins for forward-proxies and targets shared by the proxy tests.
//!
//! Every helper binds `127.0.0.1:0`, serves a single connection in a spawned task and reports
//! what it saw through a oneshot channel. TLS helpers use a throwaway CA whose leaf certificate
//! is valid for `localhost` and `127.0.0.1`.

use std::net::SocketAddr;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_rustls::{TlsAcceptor, TlsConnector};

const CA_CERT: &[u8] = include_bytes!("testdata/ca.der");
const SERVER_CERT: &[u8] = include_bytes!("testdata/server.der");
const SERVER_KEY: &[u8] = include_bytes!("testdata/server.key.der");

pub const CONNECT_OK: &str = "HTTP/1.1 200 Connection Established\r\n\r\n";

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Client connector that trusts only the test CA
pub fn trusting_connector() -> TlsConnector {
    let mut roots = rustls::RootCertStore::empty();
    roots.add(CertificateDer::from(CA_CERT)).unwrap();

    let config = rustls::ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

pub fn tls_acceptor() -> TlsAcceptor {
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(SERVER_KEY));
    let config = rustls::ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![CertificateDer::from(SERVER_CERT)], key)
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

/// Read up to and including the blank line that ends a request head
pub async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await.unwrap();
        assert!(n > 0, "connection closed before request head");
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

/// Target that echoes the first chunk it receives
pub async fn echo_target() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf).await.unwrap();
        stream.write_all(&buf[..n]).await.unwrap();
    });
    addr
}

/// Raw HTTP server answering one request with `reply`; yields the request head.
///
/// With `tls` set the connection is TLS-terminated first, so the same helper stands in for an
/// https target or an https proxy receiving absolute-form requests.
pub async fn http_server(
    reply: &'static str,
    tls: bool,
) -> (SocketAddr, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        if tls {
            let stream = tls_acceptor().accept(stream).await.unwrap();
            answer(stream, reply, tx).await;
        } else {
            answer(stream, reply, tx).await;
        }
    });
    (addr, rx)
}

async fn answer<S>(mut stream: S, reply: &str, tx: oneshot::Sender<String>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let head = read_head(&mut stream).await;
    let _ = tx.send(head);
    stream.write_all(reply.as_bytes()).await.unwrap();
    let _ = stream.shutdown().await;
}

/// HTTP CONNECT proxy handling one tunnel; yields the CONNECT head.
///
/// A 2xx `reply` dials the requested authority and relays bytes both ways, anything else is
/// written back and the connection dropped.
pub async fn connect_proxy(
    reply: &'static str,
    tls: bool,
) -> (SocketAddr, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        if tls {
            let stream = tls_acceptor().accept(stream).await.unwrap();
            tunnel(stream, reply, tx).await;
        } else {
            tunnel(stream, reply, tx).await;
        }
    });
    (addr, rx)
}

async fn tunnel<S>(mut client: S, reply: &str, tx: oneshot::Sender<String>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let head = read_head(&mut client).await;
    let authority = head
        .split_whitespace()
        .nth(1)
        .unwrap_or_default()
        .to_string();
    let _ = tx.send(head);

    if !reply.starts_with("HTTP/1.1 2") {
        client.write_all(reply.as_bytes()).await.unwrap();
        return;
    }

    let mut upstream = TcpStream::connect(authority).await.unwrap();
    client.write_all(reply.as_bytes()).await.unwrap();
    let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
}

/// What a SOCKS5 client asked for
#[derive(Debug)]
pub struct SocksConnect {
    pub credentials: Option<(String, String)>,
    pub destination: String,
}

/// SOCKS5 proxy handling one tunnel. Username/password auth is offered when `with_auth`.
pub async fn socks5_proxy(with_auth: bool) -> (SocketAddr, oneshot::Receiver<SocksConnect>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let (mut client, _) = listener.accept().await.unwrap();

        let mut greeting = [0u8; 2];
        client.read_exact(&mut greeting).await.unwrap();
        assert_eq!(greeting[0], 0x05);
        let mut methods = vec![0u8; greeting[1] as usize];
        client.read_exact(&mut methods).await.unwrap();

        let credentials = if with_auth {
            assert!(methods.contains(&0x02));
            client.write_all(&[0x05, 0x02]).await.unwrap();
            let user = read_auth_field(&mut client, true).await;
            let pass = read_auth_field(&mut client, false).await;
            client.write_all(&[0x01, 0x00]).await.unwrap();
            Some((user, pass))
        } else {
            client.write_all(&[0x05, 0x00]).await.unwrap();
            None
        };

        let mut request = [0u8; 4];
        client.read_exact(&mut request).await.unwrap();
        assert_eq!(request[..3], [0x05, 0x01, 0x00]);
        let host = match request[3] {
            0x01 => {
                let mut ip = [0u8; 4];
                client.read_exact(&mut ip).await.unwrap();
                std::net::Ipv4Addr::from(ip).to_string()
            }
            0x03 => {
                let mut len = [0u8; 1];
                client.read_exact(&mut len).await.unwrap();
                let mut name = vec![0u8; len[0] as usize];
                client.read_exact(&mut name).await.unwrap();
                String::from_utf8(name).unwrap()
            }
            other => panic!("unexpected address type {}", other),
        };
        let mut port = [0u8; 2];
        client.read_exact(&mut port).await.unwrap();
        let destination = format!("{}:{}", host, u16::from_be_bytes(port));

        let mut upstream = TcpStream::connect(&destination).await.unwrap();
        client
            .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .await
            .unwrap();
        let _ = tx.send(SocksConnect {
            credentials,
            destination,
        });
        let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
    });
    (addr, rx)
}

/// One length-prefixed field of the username/password sub-negotiation
async fn read_auth_field(client: &mut TcpStream, leading_version: bool) -> String {
    if leading_version {
        let mut version = [0u8; 1];
        client.read_exact(&mut version).await.unwrap();
        assert_eq!(version[0], 0x01);
    }
    let mut len = [0u8; 1];
    client.read_exact(&mut len).await.unwrap();
    let mut field = vec![0u8; len[0] as usize];
    client.read_exact(&mut field).await.unwrap();
    String::from_utf8(field).unwrap()
}
