//! Outbound HTTP client shared by the forwarder and the health checker.
//!
//! Upstreams may be `http` or `https`; TLS uses rustls with the webpki
//! root store.

use axum::body::Body;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

pub type UpstreamClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Build a pooled client that speaks both plain and TLS HTTP/1.1.
pub fn upstream_client() -> UpstreamClient {
    let connector = HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .build();
    Client::builder(TokioExecutor::new()).build(connector)
}
