//! Shared helpers for listener integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;

use bytes::Bytes;
use http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde_json::Value;

use daprfn_core::DaprConfig;
use daprfn_listener::{DaprServiceListener, DestinationShape, Function, InvocationOutput};

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Reply {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("response body is JSON")
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Listener on an ephemeral loopback port, without the sidecar check.
pub fn listener() -> DaprServiceListener {
    let mut config = DaprConfig::default().with_app_port(0);
    config.sidecar_metadata_check = false;
    DaprServiceListener::new(config)
}

/// Function that echoes its JSON input.
pub fn echo(name: &str) -> Function {
    Function::new(name, DestinationShape::GenericJson, |ctx| async move {
        Ok(ctx.value.as_json().cloned().map(InvocationOutput::Json))
    })
}

pub async fn addr(listener: &DaprServiceListener) -> SocketAddr {
    listener.local_addr().await.expect("listener is running")
}

/// One request on a fresh connection.
pub async fn send(addr: SocketAddr, method: Method, path: &str, body: Option<&str>) -> Reply {
    try_send(addr, method, path, body)
        .await
        .expect("request to listener failed")
}

pub async fn try_send(
    addr: SocketAddr,
    method: Method,
    path: &str,
    body: Option<&str>,
) -> anyhow::Result<Reply> {
    let client: Client<HttpConnector, Full<Bytes>> = Client::builder(TokioExecutor::new())
        .pool_max_idle_per_host(0)
        .build_http();

    let mut builder = Request::builder()
        .method(method)
        .uri(format!("http://{addr}{path}"));
    if body.is_some() {
        builder = builder.header(http::header::CONTENT_TYPE, "application/json");
    }
    let request = builder.body(Full::new(Bytes::from(body.unwrap_or_default().to_string())))?;

    let response = client.request(request).await?;
    let (parts, incoming) = response.into_parts();
    let body = incoming.collect().await?.to_bytes();
    Ok(Reply {
        status: parts.status,
        headers: parts.headers,
        body,
    })
}
