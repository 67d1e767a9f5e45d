//! Response capture for retryable upstream exchanges
//!
//! The upstream side of a request never writes to the client directly. It writes into a
//! [`ResponseSink`]; during dispatch that sink is a [`ResponseBuffer`], which can be inspected,
//! reset and finally flushed into the [`ClientResponse`] that hyper sends back.

use bytes::{Bytes, BytesMut};
use http_body_util::Full;
use hyper::header::HeaderMap;
use hyper::{Response, StatusCode};

/// Anything an upstream response can be written into
pub trait ResponseSink {
    /// Record the status code
    fn set_status(&mut self, status: u16);

    /// Header collection the upstream headers are copied into
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Append body bytes, returning how many were accepted
    fn write_body(&mut self, chunk: &[u8]) -> usize;
}

/// Captured status, headers and body of one upstream attempt
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    /// 0 until a status is recorded
    status: u16,
    headers: HeaderMap,
    body: BytesMut,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last recorded status code, 0 if none
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Erase everything captured so far
    pub fn reset(&mut self) {
        self.status = 0;
        self.headers = HeaderMap::new();
        self.body.clear();
    }

    /// Write the captured response into the real sink.
    ///
    /// Status is written first, then the body. Captured headers are only relayed when
    /// `relay_headers` is set.
    pub fn flush<S: ResponseSink>(&self, sink: &mut S, relay_headers: bool) {
        sink.set_status(self.status);
        if relay_headers {
            let headers = sink.headers_mut();
            for (name, value) in &self.headers {
                headers.append(name.clone(), value.clone());
            }
        }
        sink.write_body(&self.body);
    }
}

impl ResponseSink for ResponseBuffer {
    fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_body(&mut self, chunk: &[u8]) -> usize {
        self.body.extend_from_slice(chunk);
        chunk.len()
    }
}

/// The response that goes back over the client connection
#[derive(Debug, Default)]
pub struct ClientResponse {
    status: u16,
    headers: HeaderMap,
    body: BytesMut,
}

impl ClientResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the hyper response. An unset or invalid status becomes 502.
    pub fn into_response(self) -> Response<Full<Bytes>> {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::BAD_GATEWAY);

        let mut response = Response::new(Full::new(self.body.freeze()));
        *response.status_mut() = status;
        *response.headers_mut() = self.headers;
        response
    }
}

impl ResponseSink for ClientResponse {
    fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_body(&mut self, chunk: &[u8]) -> usize {
        self.body.extend_from_slice(chunk);
        chunk.len()
    }
}
