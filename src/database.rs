//! Database handle: documents, views and the changes feed.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, trace};

use crate::cache::DocumentCache;
use crate::changes::Changes;
use crate::client::ConnectOptions;
use crate::error::{Error, Result};
use crate::events::ViewParseMode;
use crate::protocol::{BulkResult, DatabaseInfo, Document, WriteResult};
use crate::query::{database_path, document_path, view_path, ChangesQuery, Feed, ViewQuery};
use crate::transport::{Request, Transport};
use crate::view::View;

/// An open database.
///
/// Single-document fetches go through a per-database LRU of documents
/// validated by ETag. The cache sits behind a mutex that is only held for
/// individual lookups and inserts, never across a request.
pub struct Database {
  name: String,
  transport: Arc<dyn Transport>,
  cache: Mutex<DocumentCache>,
  view_mode: ViewParseMode,
}

impl Database {
  pub(crate) fn new(name: &str, transport: Arc<dyn Transport>, options: &ConnectOptions) -> Self {
    Self {
      name: name.to_string(),
      transport,
      cache: Mutex::new(DocumentCache::new(options.cache_capacity)),
      view_mode: options.view_parse_mode,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Database metadata.
  pub async fn info(&self) -> Result<DatabaseInfo> {
    let response = self.transport.send(Request::get(database_path(&self.name))).await?;
    match response.status() {
      404 => Err(Error::DatabaseNotFound(self.name.clone())),
      _ if response.is_success() => response.json().await,
      status => Err(Error::from_status(status)),
    }
  }

  /// Fetches document `id`, reusing the cached instance when the server
  /// reports an unchanged ETag.
  pub async fn get_doc(&self, id: &str) -> Result<Arc<Document>> {
    self
      .fetch_doc(id)
      .await?
      .ok_or_else(|| Error::DocumentNotFound(id.to_string()))
  }

  /// Like [`get_doc`](Self::get_doc), but a missing document yields `default`.
  pub async fn get_doc_or(&self, id: &str, default: Arc<Document>) -> Result<Arc<Document>> {
    Ok(self.fetch_doc(id).await?.unwrap_or(default))
  }

  async fn fetch_doc(&self, id: &str) -> Result<Option<Arc<Document>>> {
    let cached = self.cache.lock().get(id);

    let mut request = Request::get(document_path(&self.name, id));
    if let Some(entry) = &cached {
      request = request.header("If-None-Match", entry.etag.as_str());
    }
    let response = self.transport.send(request).await?;

    match (response.status(), &cached) {
      (404, cached) => {
        if cached.is_some() {
          self.cache.lock().invalidate(id);
        }
        return Ok(None);
      }
      (304, Some(entry)) => {
        trace!(id, "document not modified");
        return Ok(Some(entry.document.clone()));
      }
      (status, _) if !(200..300).contains(&status) => return Err(Error::Remote { status }),
      _ => {}
    }

    let etag = response.etag().map(str::to_string);
    if let (Some(entry), Some(etag)) = (&cached, &etag) {
      if entry.etag == *etag {
        trace!(id, "document cache hit");
        return Ok(Some(entry.document.clone()));
      }
    }

    let document: Arc<Document> = Arc::new(response.json().await?);
    match etag {
      Some(etag) => {
        self.cache.lock().insert(id, etag, document.clone());
      }
      None => {
        debug!(id, "response carries no ETag, not caching");
        if cached.is_some() {
          self.cache.lock().invalidate(id);
        }
      }
    }
    Ok(Some(document))
  }

  /// Creates or updates a document; returns it with `_id` and `_rev` set.
  pub async fn save(&self, doc: &Document) -> Result<Document> {
    let request = Request::post(database_path(&self.name)).json_body(doc)?;
    let response = self.transport.send(request).await?;
    match response.status() {
      409 => {
        return Err(Error::DocumentConflict(
          doc.id().unwrap_or_default().to_string(),
        ))
      }
      status if !(200..300).contains(&status) => return Err(Error::from_status(status)),
      _ => {}
    }

    let written: WriteResult = response.json().await?;
    self.cache.lock().invalidate(&written.id);

    let mut saved = doc.clone();
    saved.insert("_id", written.id);
    saved.insert("_rev", written.rev);
    Ok(saved)
  }

  /// Writes many documents in one `_bulk_docs` request.
  pub async fn update(&self, docs: &[Document]) -> Result<Vec<BulkResult>> {
    let path = format!("{}/_bulk_docs", database_path(&self.name));
    let request = Request::post(path).json_body(&json!({ "docs": docs }))?;
    let response = self.transport.send(request).await?;
    if !response.is_success() {
      return Err(Error::from_status(response.status()));
    }

    let results: Vec<BulkResult> = response.json().await?;
    let mut cache = self.cache.lock();
    for id in results.iter().filter_map(|r| r.id.as_deref()) {
      cache.invalidate(id);
    }
    Ok(results)
  }

  /// Deletes the given revision of a document.
  pub async fn delete_doc(&self, doc: &Document) -> Result<WriteResult> {
    let id = doc
      .id()
      .ok_or_else(|| Error::InvalidName("document has no _id".to_string()))?;
    let rev = doc
      .rev()
      .ok_or_else(|| Error::InvalidName(format!("document {} has no _rev", id)))?;

    let request = Request::delete(document_path(&self.name, id)).param("rev", rev);
    let response = self.transport.send(request).await?;
    self.cache.lock().invalidate(id);
    match response.status() {
      404 => Err(Error::DocumentNotFound(id.to_string())),
      409 => Err(Error::DocumentConflict(id.to_string())),
      _ if response.is_success() => response.json().await,
      status => Err(Error::from_status(status)),
    }
  }

  /// Deletes the current revision of document `id`.
  pub async fn delete_doc_by_id(&self, id: &str) -> Result<WriteResult> {
    let doc = self.get_doc(id).await?;
    self.delete_doc(&doc).await
  }

  /// Queries view `name` (`design/view` or a special view like `_all_docs`).
  ///
  /// Returns once the view header has been read; rows are pulled from the
  /// connection as they are consumed.
  pub async fn view(&self, name: &str, query: ViewQuery) -> Result<View> {
    let path = view_path(&self.name, name)?;
    let request = match query.keys_body() {
      Some(body) => Request::post(path).json_body(&body)?,
      None => Request::get(path),
    };
    let request = request.params(query.params()).streaming();

    let response = self.transport.send(request).await?;
    View::from_response(response, self.view_mode).await
  }

  /// Opens the changes feed. Only [`Feed::Continuous`] is supported.
  pub async fn changes(&self, query: ChangesQuery) -> Result<Changes> {
    let feed = query.feed_mode()?;
    if feed != Feed::Continuous {
      return Err(Error::NotSupported(feed.to_string()));
    }

    let path = format!("{}/_changes", database_path(&self.name));
    let request = Request::get(path).params(query.params()).streaming();
    let response = self.transport.send(request).await?;
    Changes::from_response(response, query.heartbeats())
  }

  /// Deletes this database on the server and empties the cache.
  pub async fn delete(&self) -> Result<()> {
    self.clear_cache();
    delete_database(self.transport.as_ref(), &self.name).await
  }

  /// Number of documents currently cached.
  pub fn cache_len(&self) -> usize {
    self.cache.lock().len()
  }

  pub fn clear_cache(&self) {
    self.cache.lock().clear();
  }
}

impl fmt::Display for Database {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "<Database {}>", self.name)
  }
}

impl fmt::Debug for Database {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Database")
      .field("name", &self.name)
      .field("view_mode", &self.view_mode)
      .finish_non_exhaustive()
  }
}

pub(crate) async fn delete_database(transport: &dyn Transport, name: &str) -> Result<()> {
  debug!(db = name, "deleting database");
  let response = transport.send(Request::delete(database_path(name))).await?;
  match response.status() {
    404 => Err(Error::DatabaseNotFound(name.to_string())),
    _ if response.is_success() => Ok(()),
    status => Err(Error::from_status(status)),
  }
}
