//! Server handle and connection options.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::database::{delete_database, Database};
use crate::error::{Error, Result};
use crate::events::ViewParseMode;
use crate::protocol::{DEFAULT_CACHE_CAPACITY, DEFAULT_URL};
use crate::query::{database_path, validate_db_name};
use crate::transport::{HttpTransport, Request, Transport};

/// Connection options for a [`Server`]
#[derive(Debug, Clone)]
pub struct ConnectOptions {
  /// Server root, e.g. `http://localhost:5984`. May embed `user:pass@`.
  pub url: String,
  /// Basic auth credentials
  pub auth: Option<(String, String)>,
  /// Documents kept per database by the document cache
  pub cache_capacity: usize,
  /// How view bodies are parsed
  pub view_parse_mode: ViewParseMode,
}

impl ConnectOptions {
  pub fn new(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      ..Self::default()
    }
  }

  pub fn with_basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
    self.auth = Some((user.into(), password.into()));
    self
  }

  pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
    self.cache_capacity = capacity;
    self
  }

  pub fn with_view_parse_mode(mut self, mode: ViewParseMode) -> Self {
    self.view_parse_mode = mode;
    self
  }
}

impl Default for ConnectOptions {
  fn default() -> Self {
    Self {
      url: DEFAULT_URL.to_string(),
      auth: None,
      cache_capacity: DEFAULT_CACHE_CAPACITY,
      view_parse_mode: ViewParseMode::default(),
    }
  }
}

#[derive(Deserialize)]
struct Welcome {
  version: String,
}

#[derive(Deserialize)]
struct Uuids {
  uuids: Vec<Uuid>,
}

/// Handle on a CouchDB server.
///
/// Cheap to clone; clones share the transport.
#[derive(Clone)]
pub struct Server {
  transport: Arc<dyn Transport>,
  options: ConnectOptions,
}

impl Server {
  /// Server at `url` over HTTP. No request is made until first use.
  pub fn new(url: &str) -> Result<Self> {
    Self::connect_with_options(ConnectOptions::new(url))
  }

  pub fn connect_with_options(options: ConnectOptions) -> Result<Self> {
    let transport = HttpTransport::new(&options)?;
    Ok(Self::with_transport(Arc::new(transport), options))
  }

  /// Server reached through a custom transport.
  pub fn with_transport(transport: Arc<dyn Transport>, options: ConnectOptions) -> Self {
    Self { transport, options }
  }

  pub fn options(&self) -> &ConnectOptions {
    &self.options
  }

  /// Whether the server answers at all.
  pub async fn is_available(&self) -> bool {
    match self.transport.send(Request::head("/")).await {
      Ok(response) => response.is_success(),
      Err(e) => {
        debug!(error = %e, "server unavailable");
        false
      }
    }
  }

  /// Whether database `name` exists.
  pub async fn exists(&self, name: &str) -> Result<bool> {
    let response = self.transport.send(Request::head(database_path(name))).await?;
    match response.status() {
      404 => Ok(false),
      _ if response.is_success() => Ok(true),
      status => Err(Error::from_status(status)),
    }
  }

  /// Names of all databases.
  pub async fn databases(&self) -> Result<Vec<String>> {
    let response = self.transport.send(Request::get("/_all_dbs")).await?;
    if !response.is_success() {
      return Err(Error::from_status(response.status()));
    }
    response.json().await
  }

  pub async fn database_count(&self) -> Result<usize> {
    Ok(self.databases().await?.len())
  }

  /// Server version string.
  pub async fn version(&self) -> Result<String> {
    let response = self.transport.send(Request::get("/")).await?;
    if !response.is_success() {
      return Err(Error::from_status(response.status()));
    }
    let welcome: Welcome = response.json().await?;
    Ok(welcome.version)
  }

  /// `count` UUIDs generated by the server.
  pub async fn uuids(&self, count: usize) -> Result<Vec<Uuid>> {
    let request = Request::get("/_uuids").param("count", count.to_string());
    let response = self.transport.send(request).await?;
    if !response.is_success() {
      return Err(Error::from_status(response.status()));
    }
    let uuids: Uuids = response.json().await?;
    Ok(uuids.uuids)
  }

  /// Creates database `name` and opens it.
  pub async fn create_db(&self, name: &str) -> Result<Database> {
    validate_db_name(name)?;
    debug!(db = name, "creating database");

    let response = self.transport.send(Request::put(database_path(name))).await?;
    match response.status() {
      412 => return Err(Error::DatabaseExists(name.to_string())),
      status if !(200..300).contains(&status) => return Err(Error::from_status(status)),
      _ => {}
    }

    let reply: Value = response.json().await?;
    if reply.get("ok").and_then(Value::as_bool) != Some(true) {
      return Err(Error::Parse(format!("unexpected create reply: {}", reply)));
    }
    Ok(self.open(name))
  }

  /// Deletes database `name`.
  pub async fn delete_db(&self, name: &str) -> Result<()> {
    delete_database(self.transport.as_ref(), name).await
  }

  /// Opens an existing database.
  pub async fn database(&self, name: &str) -> Result<Database> {
    let response = self.transport.send(Request::head(database_path(name))).await?;
    match response.status() {
      404 => Err(Error::DatabaseNotFound(name.to_string())),
      _ if response.is_success() => Ok(self.open(name)),
      status => Err(Error::from_status(status)),
    }
  }

  fn open(&self, name: &str) -> Database {
    Database::new(name, self.transport.clone(), &self.options)
  }
}
