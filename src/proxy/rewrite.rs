//! Reverse-proxy request rewriting and response copying

use std::net::IpAddr;

use bytes::Bytes;
use http::request::Parts;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, HOST};
use hyper::{Request, Response};

use crate::error::{RelayError, Result};
use crate::models::Target;
use crate::proxy::buffer::ResponseSink;

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Build the request sent to the target for one attempt.
///
/// The URI is the target's absolute URI for the inbound path; `Host` is the target authority.
pub fn outbound_request(
    target: &Target,
    parts: &Parts,
    body: Bytes,
    client_ip: Option<IpAddr>,
) -> Result<Request<Full<Bytes>>> {
    let mut headers = parts.headers.clone();
    remove_hop_by_hop_headers(&mut headers);

    let host = HeaderValue::from_str(target.authority())
        .map_err(|e| RelayError::InvalidRequest(format!("Invalid target host: {}", e)))?;
    headers.insert(HOST, host);

    if let Some(ip) = client_ip {
        append_forwarded_for(&mut headers, ip)?;
    }

    let mut request = Request::new(Full::new(body));
    *request.method_mut() = parts.method.clone();
    *request.uri_mut() = target.request_uri(&parts.uri)?;
    *request.headers_mut() = headers;

    Ok(request)
}

/// Read the whole upstream response and write it into `sink`.
///
/// Nothing is written to the sink unless the body was read completely.
pub async fn copy_response<B, S>(response: Response<B>, sink: &mut S) -> Result<()>
where
    B: Body,
    B::Error: std::fmt::Display,
    S: ResponseSink,
{
    let (parts, body) = response.into_parts();
    let body = body
        .collect()
        .await
        .map_err(|e| RelayError::Http(format!("Failed to read response: {}", e)))?
        .to_bytes();

    let mut headers = parts.headers;
    remove_hop_by_hop_headers(&mut headers);

    sink.headers_mut().extend(headers);
    sink.set_status(parts.status.as_u16());
    sink.write_body(&body);

    Ok(())
}

/// Strip hop-by-hop headers, including any named by `Connection`
pub fn remove_hop_by_hop_headers(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, ip: IpAddr) -> Result<()> {
    let prior: Vec<&str> = headers
        .get_all(&X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    let value = if prior.is_empty() {
        ip.to_string()
    } else {
        format!("{}, {}", prior.join(", "), ip)
    };

    let value = HeaderValue::from_str(&value)
        .map_err(|e| RelayError::InvalidRequest(format!("Invalid X-Forwarded-For: {}", e)))?;
    headers.insert(X_FORWARDED_FOR.clone(), value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::buffer::ResponseBuffer;
    use hyper::header::{CONTENT_TYPE, TRANSFER_ENCODING};
    use hyper::{Method, StatusCode};

    fn inbound(method: Method, uri: &str, headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn outbound_request_rewrites_host_and_uri() {
        let target = Target::parse("https://api.example.com/base").unwrap();
        let parts = inbound(
            Method::POST,
            "/v1/chat?stream=true",
            &[
                ("host", "relay.local:8888"),
                ("content-type", "application/json"),
                ("connection", "keep-alive, x-session"),
                ("x-session", "abc"),
                ("proxy-authorization", "Basic c2VjcmV0"),
            ],
        );

        let request = outbound_request(
            &target,
            &parts,
            Bytes::from_static(b"{}"),
            Some("10.1.2.3".parse().unwrap()),
        )
        .unwrap();

        assert_eq!(request.method(), Method::POST);
        assert_eq!(
            request.uri().to_string(),
            "https://api.example.com/base/v1/chat?stream=true"
        );
        let headers = request.headers();
        assert_eq!(headers.get(HOST).unwrap(), "api.example.com");
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert!(headers.get(CONNECTION).is_none());
        assert!(headers.get("x-session").is_none());
        assert!(headers.get("proxy-authorization").is_none());
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "10.1.2.3");
    }

    #[test]
    fn forwarded_for_is_appended() {
        let target = Target::parse("http://target.test").unwrap();
        let parts = inbound(
            Method::GET,
            "/",
            &[("x-forwarded-for", "192.168.0.1")],
        );

        let request =
            outbound_request(&target, &parts, Bytes::new(), Some("10.0.0.9".parse().unwrap()))
                .unwrap();
        assert_eq!(
            request.headers().get("x-forwarded-for").unwrap(),
            "192.168.0.1, 10.0.0.9"
        );
    }

    #[tokio::test]
    async fn copy_response_fills_sink() {
        let response = Response::builder()
            .status(StatusCode::TOO_MANY_REQUESTS)
            .header(CONTENT_TYPE, "text/plain")
            .header(TRANSFER_ENCODING, "chunked")
            .header("retry-after", "30")
            .body(Full::new(Bytes::from_static(b"rate limited")))
            .unwrap();

        let mut buffer = ResponseBuffer::new();
        copy_response(response, &mut buffer).await.unwrap();

        assert_eq!(buffer.status(), 429);
        assert_eq!(buffer.body(), b"rate limited");
        assert_eq!(buffer.headers().get("retry-after").unwrap(), "30");
        assert!(buffer.headers().get(TRANSFER_ENCODING).is_none());
    }
}
