//! HTTP transport used by the server and database facades.
//!
//! The facades only build [`Request`]s and read [`Response`]s; socket handling,
//! HTTP framing and authentication belong to a [`Transport`]. [`HttpTransport`]
//! is the reqwest-backed implementation; tests plug in scripted transports.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::client::ConnectOptions;
use crate::error::{Error, Result};
use crate::lines::LineReader;

/// Lazily delivered response body chunks
pub type ChunkStream = BoxStream<'static, Result<Bytes>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Head,
  Put,
  Post,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Put => "PUT",
      Method::Post => "POST",
      Method::Delete => "DELETE",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl From<Method> for reqwest::Method {
  fn from(method: Method) -> Self {
    match method {
      Method::Get => reqwest::Method::GET,
      Method::Head => reqwest::Method::HEAD,
      Method::Put => reqwest::Method::PUT,
      Method::Post => reqwest::Method::POST,
      Method::Delete => reqwest::Method::DELETE,
    }
  }
}

/// A request relative to the server root.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  /// Absolute path, starting with `/`.
  pub path: String,
  pub headers: Vec<(String, String)>,
  pub params: Vec<(String, String)>,
  pub body: Option<Bytes>,
  /// Deliver the body incrementally instead of buffering it.
  pub streaming: bool,
}

impl Request {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      headers: Vec::new(),
      params: Vec::new(),
      body: None,
      streaming: false,
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::Get, path)
  }

  pub fn head(path: impl Into<String>) -> Self {
    Self::new(Method::Head, path)
  }

  pub fn put(path: impl Into<String>) -> Self {
    Self::new(Method::Put, path)
  }

  pub fn post(path: impl Into<String>) -> Self {
    Self::new(Method::Post, path)
  }

  pub fn delete(path: impl Into<String>) -> Self {
    Self::new(Method::Delete, path)
  }

  pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.params.push((name.into(), value.into()));
    self
  }

  pub fn params(mut self, params: impl IntoIterator<Item = (String, String)>) -> Self {
    self.params.extend(params);
    self
  }

  pub fn json_body<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
    self.body = Some(Bytes::from(serde_json::to_vec(body)?));
    Ok(self)
  }

  pub fn streaming(mut self) -> Self {
    self.streaming = true;
    self
  }

  /// Case-insensitive header lookup.
  pub fn header_value(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn param_value(&self, name: &str) -> Option<&str> {
    self
      .params
      .iter()
      .find(|(n, _)| n == name)
      .map(|(_, v)| v.as_str())
  }
}

enum Body {
  Buffered(Bytes),
  Streaming(ChunkStream),
}

/// Status, headers and body of a server reply.
///
/// Header names are stored lower-cased.
pub struct Response {
  status: u16,
  headers: HashMap<String, String>,
  body: Body,
}

impl Response {
  /// A response whose body is already in memory.
  pub fn new(status: u16, headers: HashMap<String, String>, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      headers: lowercase_keys(headers),
      body: Body::Buffered(body.into()),
    }
  }

  /// A response whose body arrives as a stream of chunks.
  pub fn streaming(status: u16, headers: HashMap<String, String>, chunks: ChunkStream) -> Self {
    Self {
      status,
      headers: lowercase_keys(headers),
      body: Body::Streaming(chunks),
    }
  }

  pub fn status(&self) -> u16 {
    self.status
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn headers(&self) -> &HashMap<String, String> {
    &self.headers
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .map(String::as_str)
  }

  pub fn etag(&self) -> Option<&str> {
    self.header("etag")
  }

  /// Reads the whole body into memory.
  pub async fn bytes(self) -> Result<Bytes> {
    match self.body {
      Body::Buffered(bytes) => Ok(bytes),
      Body::Streaming(chunks) => {
        let buf = chunks
          .try_fold(BytesMut::new(), |mut acc, chunk| async move {
            acc.extend_from_slice(&chunk);
            Ok(acc)
          })
          .await?;
        Ok(buf.freeze())
      }
    }
  }

  pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
    let body = self.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
  }

  /// The body as lazily pulled chunks.
  pub fn into_chunks(self) -> ChunkStream {
    match self.body {
      Body::Buffered(bytes) if bytes.is_empty() => stream::empty().boxed(),
      Body::Buffered(bytes) => stream::iter([Ok(bytes)]).boxed(),
      Body::Streaming(chunks) => chunks,
    }
  }

  /// The body split into lines.
  pub fn into_lines(self) -> LineReader {
    LineReader::new(self.into_chunks())
  }
}

impl fmt::Debug for Response {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Response")
      .field("status", &self.status)
      .field("headers", &self.headers)
      .field(
        "streaming",
        &matches!(self.body, Body::Streaming(_)),
      )
      .finish()
  }
}

fn lowercase_keys(headers: HashMap<String, String>) -> HashMap<String, String> {
  headers
    .into_iter()
    .map(|(k, v)| (k.to_ascii_lowercase(), v))
    .collect()
}

/// Performs requests against a server.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: Request) -> Result<Response>;
}

/// reqwest-backed transport.
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: String,
  auth: Option<(String, String)>,
}

impl HttpTransport {
  /// Builds a transport for `options.url`.
  ///
  /// Credentials embedded in the URL are used for basic auth unless the
  /// options carry their own.
  pub fn new(options: &ConnectOptions) -> Result<Self> {
    let mut url =
      reqwest::Url::parse(&options.url).map_err(|e| Error::InvalidUrl(format!("{}: {}", options.url, e)))?;

    let mut auth = options.auth.clone();
    if !url.username().is_empty() {
      let user = urlencoding::decode(url.username())
        .map_err(|e| Error::InvalidUrl(e.to_string()))?
        .into_owned();
      let pass = urlencoding::decode(url.password().unwrap_or_default())
        .map_err(|e| Error::InvalidUrl(e.to_string()))?
        .into_owned();
      auth.get_or_insert((user, pass));
      url
        .set_username("")
        .and_then(|_| url.set_password(None))
        .map_err(|_| Error::InvalidUrl(options.url.clone()))?;
    }

    Ok(Self {
      client: reqwest::Client::new(),
      base_url: url.as_str().trim_end_matches('/').to_string(),
      auth,
    })
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(&self, request: Request) -> Result<Response> {
    let url = format!("{}{}", self.base_url, request.path);
    debug!(method = %request.method, %url, streaming = request.streaming, "sending request");

    let mut builder = self
      .client
      .request(request.method.into(), &url)
      .header(CONTENT_TYPE, "application/json");
    if !request.params.is_empty() {
      builder = builder.query(&request.params);
    }
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some((user, pass)) = &self.auth {
      builder = builder.basic_auth(user, Some(pass));
    }
    if let Some(body) = request.body {
      builder = builder.body(body);
    }

    let response = builder.send().await?;
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    debug!(status, "received response");

    if request.streaming {
      let chunks = response.bytes_stream().map_err(Error::from).boxed();
      Ok(Response::streaming(status, headers, chunks))
    } else {
      let body = response.bytes().await?;
      Ok(Response::new(status, headers, body))
    }
  }
}
