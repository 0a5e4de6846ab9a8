//! Intercepted requests and responses.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

use crate::error::{Result, SyncError};

/// Request mode, as the platform reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
  /// Top-level page navigation
  Navigate,
  #[default]
  Cors,
  NoCors,
  SameOrigin,
}

/// What the request is for.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Destination {
  Document,
  Style,
  Script,
  Image,
  Font,
  #[default]
  Empty,
  Other(String),
}

impl Destination {
  pub fn parse(s: &str) -> Self {
    match s.to_lowercase().as_str() {
      "document" => Destination::Document,
      "style" => Destination::Style,
      "script" => Destination::Script,
      "image" => Destination::Image,
      "font" => Destination::Font,
      "" => Destination::Empty,
      other => Destination::Other(other.to_string()),
    }
  }

  /// Style, script and image loads.
  pub fn is_static_asset(&self) -> bool {
    matches!(
      self,
      Destination::Style | Destination::Script | Destination::Image
    )
  }
}

/// A request seen by the fetch hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub url: Url,
  pub method: String,
  pub mode: RequestMode,
  pub destination: Destination,
  pub headers: BTreeMap<String, String>,
  pub body: Option<String>,
}

impl Request {
  pub fn new(method: &str, url: &str) -> Result<Self> {
    let url =
      Url::parse(url).map_err(|e| SyncError::Config(format!("invalid url {}: {}", url, e)))?;
    Ok(Self {
      url,
      method: method.to_uppercase(),
      mode: RequestMode::default(),
      destination: Destination::default(),
      headers: BTreeMap::new(),
      body: None,
    })
  }

  pub fn get(url: &str) -> Result<Self> {
    Self::new("GET", url)
  }

  /// A top-level page load.
  pub fn navigate(url: &str) -> Result<Self> {
    let mut request = Self::get(url)?;
    request.mode = RequestMode::Navigate;
    request.destination = Destination::Document;
    Ok(request)
  }

  pub fn post(url: &str, body: impl Into<String>) -> Result<Self> {
    let mut request = Self::new("POST", url)?;
    request.body = Some(body.into());
    Ok(request)
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.insert(name.into().to_lowercase(), value.into());
    self
  }

  /// Origin part of the URL, e.g. `https://app.example.com`. Fails for
  /// opaque origins.
  pub fn origin(&self) -> Result<String> {
    crate::queue::scope_of(&self.url)
  }

  /// Path plus query, the part replayed against the origin.
  pub fn path_and_query(&self) -> String {
    match self.url.query() {
      Some(q) => format!("{}?{}", self.url.path(), q),
      None => self.url.path().to_string(),
    }
  }

  pub fn is_get(&self) -> bool {
    self.method == "GET"
  }
}

/// A response, as stored in a named cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
  #[serde(with = "hex")]
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: BTreeMap::new(),
      body: body.into(),
    }
  }

  pub fn ok(body: impl Into<Vec<u8>>) -> Self {
    Self::new(200, body)
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.insert(name.into().to_lowercase(), value.into());
    self
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(&name.to_lowercase()).map(String::as_str)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_request_parts() {
    let req = Request::post("https://app.example.com/api/sync?batch=2", "{}").unwrap();
    assert_eq!(req.method, "POST");
    assert_eq!(req.origin().unwrap(), "https://app.example.com");
    assert_eq!(req.path_and_query(), "/api/sync?batch=2");

    let nav = Request::navigate("https://app.example.com/dashboard").unwrap();
    assert_eq!(nav.mode, RequestMode::Navigate);
    assert!(nav.is_get());
  }

  #[test]
  fn test_opaque_origin_is_rejected() {
    let req = Request::post("data:text/plain,hello", "{}").unwrap();
    assert!(matches!(req.origin(), Err(SyncError::Config(_))));
  }

  #[test]
  fn test_invalid_url() {
    assert!(matches!(Request::get("not a url"), Err(SyncError::Config(_))));
  }

  #[test]
  fn test_destination_parse() {
    assert_eq!(Destination::parse("Script"), Destination::Script);
    assert!(Destination::parse("image").is_static_asset());
    assert!(!Destination::parse("font").is_static_asset());
    assert_eq!(Destination::parse("worker"), Destination::Other("worker".into()));
  }

  #[test]
  fn test_response_body_roundtrips_as_hex() {
    let res = Response::ok(vec![0u8, 255, 16]).with_header("Content-Type", "application/wasm");
    let json = serde_json::to_string(&res).unwrap();
    assert!(json.contains("\"00ff10\""));
    assert_eq!(serde_json::from_str::<Response>(&json).unwrap(), res);
    assert_eq!(res.header("content-type"), Some("application/wasm"));
  }
}
