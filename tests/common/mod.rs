//! Scripted transport shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde_json::Value;

use coucher::{ConnectOptions, Request, Response, Result, Server, Transport};

/// A canned reply.
#[derive(Debug, Clone)]
pub struct MockResponse {
  pub status: u16,
  pub headers: HashMap<String, String>,
  pub body: Vec<u8>,
  /// Split streaming bodies into chunks of this many bytes.
  pub chunk_size: usize,
}

impl MockResponse {
  pub fn json(status: u16, body: Value) -> Self {
    Self::raw(status, body.to_string())
  }

  pub fn raw(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: HashMap::new(),
      body: body.into(),
      chunk_size: 7,
    }
  }

  pub fn status(status: u16) -> Self {
    Self::raw(status, Vec::new())
  }

  pub fn with_etag(mut self, etag: &str) -> Self {
    self.headers.insert("ETag".to_string(), etag.to_string());
    self
  }

  pub fn chunked(mut self, chunk_size: usize) -> Self {
    self.chunk_size = chunk_size.max(1);
    self
  }

  fn into_response(self, streaming: bool) -> Response {
    if !streaming {
      return Response::new(self.status, self.headers, self.body);
    }
    let chunks: Vec<Result<Bytes>> = self
      .body
      .chunks(self.chunk_size)
      .map(|c| Ok(Bytes::copy_from_slice(c)))
      .collect();
    Response::streaming(self.status, self.headers, stream::iter(chunks).boxed())
  }
}

/// Replays queued responses in order and records every request.
#[derive(Default)]
pub struct MockTransport {
  responses: Mutex<VecDeque<MockResponse>>,
  requests: Mutex<Vec<Request>>,
}

impl MockTransport {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn push(&self, response: MockResponse) {
    self.responses.lock().unwrap().push_back(response);
  }

  pub fn requests(&self) -> Vec<Request> {
    self.requests.lock().unwrap().clone()
  }

  pub fn last_request(&self) -> Request {
    self.requests().pop().expect("no request was sent")
  }

  pub fn request_count(&self) -> usize {
    self.requests.lock().unwrap().len()
  }
}

#[async_trait]
impl Transport for MockTransport {
  async fn send(&self, request: Request) -> Result<Response> {
    let streaming = request.streaming;
    self.requests.lock().unwrap().push(request);
    let response = self
      .responses
      .lock()
      .unwrap()
      .pop_front()
      .expect("no response queued for request");
    Ok(response.into_response(streaming))
  }
}

pub fn server(transport: &Arc<MockTransport>) -> Server {
  server_with(transport, ConnectOptions::default())
}

pub fn server_with(transport: &Arc<MockTransport>, options: ConnectOptions) -> Server {
  Server::with_transport(transport.clone(), options)
}

/// Opens database `name` on a mock server, consuming one HEAD response.
pub async fn database(transport: &Arc<MockTransport>, name: &str) -> coucher::Database {
  database_with(transport, name, ConnectOptions::default()).await
}

pub async fn database_with(
  transport: &Arc<MockTransport>,
  name: &str,
  options: ConnectOptions,
) -> coucher::Database {
  transport.push(MockResponse::status(200));
  server_with(transport, options)
    .database(name)
    .await
    .expect("open database")
}
