//! Streaming view results.

use std::collections::VecDeque;

use futures::stream::{self, Stream};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{Error, Result};
use crate::events::{EventSource, JsonEvent, ViewParseMode};
use crate::protocol::{OFFSET, TOTAL_ROWS};
use crate::transport::Response;

/// Non-row events inspected for the header before iteration starts
const HEADER_LOOKAHEAD: usize = 2;

/// Rows of a view, read incrementally from the response body.
///
/// `total_rows` and `offset` are known once the view is built, whatever their
/// position in the body: rows the server sent before them are held back and
/// handed out first. Single pass; one consumer.
pub struct View {
  source: EventSource,
  total_rows: Option<u64>,
  offset: Option<u64>,
  fields: Map<String, Value>,
  prefetched: VecDeque<Value>,
  done: bool,
}

impl View {
  /// Reads the view header from a streaming response.
  pub async fn from_response(response: Response, mode: ViewParseMode) -> Result<Self> {
    if !response.is_success() {
      return Err(Error::Remote {
        status: response.status(),
      });
    }

    let mut view = Self {
      source: EventSource::new(mode, response.into_chunks()),
      total_rows: None,
      offset: None,
      fields: Map::new(),
      prefetched: VecDeque::new(),
      done: false,
    };
    view.read_header().await?;
    Ok(view)
  }

  async fn read_header(&mut self) -> Result<()> {
    let mut inspected = 0;
    while inspected < HEADER_LOOKAHEAD && !self.header_complete() {
      let Some(event) = self.source.next_event().await? else {
        self.done = true;
        break;
      };
      if event.is_row() {
        self.prefetched.push_back(event.value);
      } else {
        inspected += 1;
        self.record(event);
      }
    }
    Ok(())
  }

  fn header_complete(&self) -> bool {
    self.total_rows.is_some() && self.offset.is_some()
  }

  /// Stores a non-row event.
  fn record(&mut self, event: JsonEvent) {
    let slot = if event.path == TOTAL_ROWS {
      &mut self.total_rows
    } else if event.path == OFFSET {
      &mut self.offset
    } else {
      self.fields.insert(event.path, event.value);
      return;
    };
    match event.value.as_u64() {
      Some(n) => *slot = Some(n),
      None => warn!(field = %event.path, value = %event.value, "view header is not a count"),
    }
  }

  /// Total number of rows in the view, if the server reported it.
  pub fn total_rows(&self) -> Option<u64> {
    self.total_rows
  }

  /// Index of the first returned row, if the server reported it.
  pub fn offset(&self) -> Option<u64> {
    self.offset
  }

  /// Any other top-level field of the result, such as `update_seq`.
  pub fn field(&self, name: &str) -> Option<&Value> {
    self.fields.get(name)
  }

  pub fn mode(&self) -> ViewParseMode {
    self.source.mode()
  }

  /// Next row, or `None` when the result is exhausted.
  pub async fn next_row(&mut self) -> Result<Option<Value>> {
    if let Some(row) = self.prefetched.pop_front() {
      return Ok(Some(row));
    }

    while !self.done {
      match self.source.next_event().await {
        Ok(Some(event)) if event.is_row() => return Ok(Some(event.value)),
        Ok(Some(event)) => {
          warn!(field = %event.path, "unexpected field where a view row was expected");
          self.record(event);
        }
        Ok(None) => self.done = true,
        Err(e) => {
          self.done = true;
          return Err(e);
        }
      }
    }
    Ok(None)
  }

  /// The remaining rows as a stream.
  pub fn into_stream(self) -> impl Stream<Item = Result<Value>> {
    stream::try_unfold(self, |mut view| async move {
      let row = view.next_row().await?;
      Ok::<_, Error>(row.map(|row| (row, view)))
    })
  }
}
