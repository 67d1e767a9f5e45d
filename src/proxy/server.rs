//! Proxy server implementation using hyper
//!
//! Accepts client connections and hands every request to the [`ProxyHandler`].

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

use crate::error::{RelayError, Result};
use crate::proxy::handler::ProxyHandler;

/// Proxy server
pub struct ProxyServer {
    handler: Arc<ProxyHandler>,
}

impl ProxyServer {
    /// Create a new proxy server
    pub fn new(handler: Arc<ProxyHandler>) -> Self {
        Self { handler }
    }

    /// Bind the listen address. Failing here is fatal, before any connection is accepted.
    pub async fn bind(addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(addr).await?;
        info!("Proxy server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Serve connections until shutdown
    #[instrument(skip_all)]
    pub async fn run(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, client_addr)) => {
                            let handler = self.handler.clone();

                            tokio::spawn(async move {
                                if let Err(e) =
                                    Self::handle_connection(stream, client_addr, handler).await
                                {
                                    debug!("Connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Proxy server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Handle a single connection
    async fn handle_connection(
        stream: TcpStream,
        client_addr: SocketAddr,
        handler: Arc<ProxyHandler>,
    ) -> Result<()> {
        let io = TokioIo::new(stream);

        let service = service_fn(move |req: Request<Incoming>| {
            let handler = handler.clone();
            async move { Ok::<_, Infallible>(handler.handle(req, client_addr).await) }
        });

        http1::Builder::new()
            .serve_connection(io, service)
            .await
            .map_err(|e| RelayError::Http(format!("Client connection failed: {}", e)))?;

        Ok(())
    }
}
