//! Wire types exchanged with a CouchDB server.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default server address
pub const DEFAULT_URL: &str = "http://localhost:5984";

/// Default number of documents kept by a database's document cache
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Event path of a single element of a view's `rows` array
pub const ROW_PATH: &str = "rows.item";

/// Header field carrying the total number of rows of a view
pub const TOTAL_ROWS: &str = "total_rows";

/// Header field carrying the index of the first returned row
pub const OFFSET: &str = "offset";

/// A JSON document.
///
/// Persisted documents always carry `_id` and `_rev`. Documents handed out by
/// the cache are shared; treat them as read-only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
  pub fn new() -> Self {
    Self::default()
  }

  /// The document id, once assigned.
  pub fn id(&self) -> Option<&str> {
    self.0.get("_id").and_then(Value::as_str)
  }

  /// The current revision token, once saved.
  pub fn rev(&self) -> Option<&str> {
    self.0.get("_rev").and_then(Value::as_str)
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.0.get(key)
  }

  pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
    self.0.insert(key.into(), value.into())
  }

  pub fn remove(&mut self, key: &str) -> Option<Value> {
    self.0.remove(key)
  }

  pub fn fields(&self) -> &Map<String, Value> {
    &self.0
  }

  pub fn into_value(self) -> Value {
    Value::Object(self.0)
  }
}

impl From<Map<String, Value>> for Document {
  fn from(fields: Map<String, Value>) -> Self {
    Self(fields)
  }
}

impl TryFrom<Value> for Document {
  type Error = crate::Error;

  fn try_from(value: Value) -> Result<Self, Self::Error> {
    match value {
      Value::Object(fields) => Ok(Self(fields)),
      other => Err(crate::Error::Parse(format!(
        "expected a JSON object for a document, got {}",
        other
      ))),
    }
  }
}

impl fmt::Display for Document {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "<Document id={} rev={}>",
      self.id().unwrap_or("-"),
      self.rev().unwrap_or("-")
    )
  }
}

/// One event of a continuous changes feed
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
  /// A change notification, passed through as sent by the server.
  Change(Value),
  /// An empty keep-alive line.
  Heartbeat,
}

impl ChangeEvent {
  pub fn is_heartbeat(&self) -> bool {
    matches!(self, Self::Heartbeat)
  }

  /// Sequence marker to resume the feed from (`since`).
  pub fn seq(&self) -> Option<&Value> {
    self.field("seq")
  }

  /// Id of the changed document.
  pub fn id(&self) -> Option<&str> {
    self.field("id").and_then(Value::as_str)
  }

  pub fn deleted(&self) -> bool {
    self
      .field("deleted")
      .and_then(Value::as_bool)
      .unwrap_or(false)
  }

  /// The document body, present when the feed was requested with `include_docs`.
  pub fn doc(&self) -> Option<&Value> {
    self.field("doc")
  }

  /// JSON form of the event; a heartbeat is the empty object.
  pub fn into_value(self) -> Value {
    match self {
      Self::Change(value) => value,
      Self::Heartbeat => Value::Object(Map::new()),
    }
  }

  fn field(&self, name: &str) -> Option<&Value> {
    match self {
      Self::Change(value) => value.get(name),
      Self::Heartbeat => None,
    }
  }
}

/// Reply to a single-document write
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResult {
  #[serde(default)]
  pub ok: bool,
  pub id: String,
  pub rev: String,
}

/// Per-document outcome of a `_bulk_docs` request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkResult {
  pub id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub rev: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub reason: Option<String>,
}

impl BulkResult {
  pub fn is_ok(&self) -> bool {
    self.error.is_none()
  }
}

/// Database metadata returned by `GET /{db}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseInfo {
  pub db_name: String,
  #[serde(default)]
  pub doc_count: u64,
  #[serde(default)]
  pub doc_del_count: u64,
  #[serde(default)]
  pub update_seq: Value,
  #[serde(flatten)]
  pub other: Map<String, Value>,
}
