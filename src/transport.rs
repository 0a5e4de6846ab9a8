//! Network transport seams.
//!
//! [`Transport`] sends GraphQL operations for the read path; [`Fetcher`]
//! performs raw HTTP requests for the sync controller. Both are opaque to the
//! rest of the crate and may fail with any [`TransportError`].

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

use crate::error::TransportError;
use crate::worker::{Request, Response};

/// An operation descriptor. Only its document participates in cache identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
  pub name: Option<String>,
  pub document: String,
}

impl Operation {
  pub fn new(document: impl Into<String>) -> Self {
    Self {
      name: None,
      document: document.into(),
    }
  }

  pub fn named(name: impl Into<String>, document: impl Into<String>) -> Self {
    Self {
      name: Some(name.into()),
      document: document.into(),
    }
  }

  /// Name for logs: the explicit name, else the first line of the document.
  pub fn label(&self) -> &str {
    self
      .name
      .as_deref()
      .unwrap_or_else(|| self.document.lines().next().unwrap_or("").trim())
  }
}

/// Sends an operation and yields its payload.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, operation: &Operation, variables: &Value) -> Result<Value, TransportError>;
}

/// Performs a raw HTTP request.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, TransportError>;
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
  data: Option<Value>,
  #[serde(default)]
  errors: Vec<GraphqlErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct GraphqlErrorMessage {
  message: String,
}

/// GraphQL-over-HTTP transport.
#[derive(Clone)]
pub struct GraphqlTransport {
  client: reqwest::Client,
  endpoint: Url,
}

impl GraphqlTransport {
  pub fn new(endpoint: Url, token: Option<&str>) -> Result<Self, TransportError> {
    let client = build_client(token)?;
    Ok(Self { client, endpoint })
  }
}

#[async_trait]
impl Transport for GraphqlTransport {
  async fn send(&self, operation: &Operation, variables: &Value) -> Result<Value, TransportError> {
    let body = json!({
      "query": operation.document,
      "variables": variables,
      "operationName": operation.name,
    });

    let response = self
      .client
      .post(self.endpoint.clone())
      .json(&body)
      .send()
      .await?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(TransportError::Status {
        status: status.as_u16(),
        body,
      });
    }

    let payload: GraphqlResponse = response.json().await?;
    match payload.data {
      Some(data) if payload.errors.is_empty() => Ok(data),
      // Partial data with errors is still a failed read
      _ if !payload.errors.is_empty() => Err(TransportError::GraphQl(
        payload.errors.into_iter().map(|e| e.message).collect(),
      )),
      _ => Err(TransportError::Decode("response has no data".into())),
    }
  }
}

/// reqwest-backed [`Fetcher`].
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(token: Option<&str>) -> Result<Self, TransportError> {
    Ok(Self {
      client: build_client(token)?,
    })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, TransportError> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| TransportError::Decode(format!("invalid method {}: {}", request.method, e)))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await?;
    let status = response.status().as_u16();
    let headers: BTreeMap<String, String> = response
      .headers()
      .iter()
      .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
      .collect();
    let body = response.bytes().await?.to_vec();

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}

fn build_client(token: Option<&str>) -> Result<reqwest::Client, TransportError> {
  let mut headers = HeaderMap::new();
  if let Some(token) = token {
    let value = HeaderValue::from_str(&format!("Bearer {}", token))
      .map_err(|e| TransportError::Decode(format!("invalid token: {}", e)))?;
    headers.insert(AUTHORIZATION, value);
  }
  headers.insert(
    HeaderName::from_static("x-offline-sync"),
    HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
  );

  reqwest::Client::builder()
    .default_headers(headers)
    .timeout(Duration::from_secs(30))
    .build()
    .map_err(|e| TransportError::Unreachable(format!("Failed to build HTTP client: {}", e)))
}
