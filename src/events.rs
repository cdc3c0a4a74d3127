//! Incremental JSON event source.
//!
//! Turns a streamed body holding one top-level JSON object into
//! [`JsonEvent`]s as soon as each field is complete, without waiting for the
//! rest of the object. A scalar or object field `f` produces one event with
//! path `f`; every element of an array field `f` produces its own event with
//! path `f.item` (view rows are `rows.item`).
//!
//! Two strategies exist, chosen when the source is built:
//!
//! - [`ViewParseMode::Tokens`] scans the bytes directly and accepts any field
//!   order and any line layout.
//! - [`ViewParseMode::Lines`] relies on the server printing the header on the
//!   first line and one row per line afterwards, as CouchDB does.

use std::collections::VecDeque;

use bytes::{Buf, BytesMut};
use futures::StreamExt;
use serde_json::{Map, Value};
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::lines::LineReader;
use crate::protocol::ROW_PATH;
use crate::transport::ChunkStream;

/// A complete value found under `path` of the streamed object.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonEvent {
  pub path: String,
  pub value: Value,
}

impl JsonEvent {
  pub fn new(path: impl Into<String>, value: Value) -> Self {
    Self {
      path: path.into(),
      value,
    }
  }

  pub fn is_row(&self) -> bool {
    self.path == ROW_PATH
  }
}

/// How a streamed view body is split into events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewParseMode {
  /// Byte-level scanning; independent of field order and line layout.
  #[default]
  Tokens,
  /// One JSON value per line, header on the first line.
  Lines,
}

pub enum EventSource {
  Tokens(TokenEvents),
  Lines(LineEvents),
}

impl EventSource {
  pub fn new(mode: ViewParseMode, chunks: ChunkStream) -> Self {
    match mode {
      ViewParseMode::Tokens => Self::Tokens(TokenEvents::new(chunks)),
      ViewParseMode::Lines => Self::Lines(LineEvents::new(LineReader::new(chunks))),
    }
  }

  pub fn mode(&self) -> ViewParseMode {
    match self {
      Self::Tokens(_) => ViewParseMode::Tokens,
      Self::Lines(_) => ViewParseMode::Lines,
    }
  }

  /// Next event, or `None` once the object has been fully read.
  pub async fn next_event(&mut self) -> Result<Option<JsonEvent>> {
    match self {
      Self::Tokens(source) => source.next_event().await,
      Self::Lines(source) => source.next_event().await,
    }
  }
}

#[derive(Debug, Clone)]
enum State {
  /// Before the opening `{`.
  Start,
  /// After `{`: a field name or `}`.
  KeyOrEnd,
  /// After `,`: a field name.
  Key,
  Colon(String),
  Value(String),
  /// After a field value: `,` or `}`.
  AfterField,
  /// After `[` of an array field: an element or `]`.
  ItemOrEnd(String),
  /// After `,` inside an array field: an element.
  Item(String),
  /// After an element: `,` or `]`.
  AfterItem(String),
  /// After the closing `}`: only whitespace may follow.
  Trailing,
}

enum Step {
  Event(JsonEvent),
  Continue,
  NeedMore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanKind {
  Container,
  String,
  Bare,
}

/// Progress through one value, kept across chunk boundaries.
#[derive(Debug)]
struct ValueScan {
  kind: ScanKind,
  pos: usize,
  depth: usize,
  in_string: bool,
  escaped: bool,
}

impl ValueScan {
  fn start(first: u8) -> Result<Self> {
    let (kind, depth, in_string) = match first {
      b'{' | b'[' => (ScanKind::Container, 1, false),
      b'"' => (ScanKind::String, 0, true),
      b'-' | b'0'..=b'9' | b't' | b'f' | b'n' => (ScanKind::Bare, 0, false),
      other => return Err(unexpected(other, "a value")),
    };
    Ok(Self {
      kind,
      pos: 1,
      depth,
      in_string,
      escaped: false,
    })
  }

  /// Length of the value once its last byte is in `buf`.
  fn run(&mut self, buf: &[u8]) -> Option<usize> {
    while self.pos < buf.len() {
      let byte = buf[self.pos];
      self.pos += 1;

      if self.in_string {
        if self.escaped {
          self.escaped = false;
        } else if byte == b'\\' {
          self.escaped = true;
        } else if byte == b'"' {
          self.in_string = false;
          if self.kind == ScanKind::String {
            return Some(self.pos);
          }
        }
        continue;
      }

      match self.kind {
        ScanKind::Bare => {
          if matches!(byte, b',' | b'}' | b']') || byte.is_ascii_whitespace() {
            return Some(self.pos - 1);
          }
        }
        ScanKind::Container => match byte {
          b'"' => self.in_string = true,
          b'{' | b'[' => self.depth += 1,
          b'}' | b']' => {
            self.depth -= 1;
            if self.depth == 0 {
              return Some(self.pos);
            }
          }
          _ => {}
        },
        ScanKind::String => {}
      }
    }
    None
  }
}

/// Byte-level event source.
pub struct TokenEvents {
  chunks: ChunkStream,
  buf: BytesMut,
  state: State,
  scan: Option<ValueScan>,
  exhausted: bool,
}

impl TokenEvents {
  pub fn new(chunks: ChunkStream) -> Self {
    Self {
      chunks,
      buf: BytesMut::new(),
      state: State::Start,
      scan: None,
      exhausted: false,
    }
  }

  pub async fn next_event(&mut self) -> Result<Option<JsonEvent>> {
    loop {
      match self.advance()? {
        Step::Event(event) => return Ok(Some(event)),
        Step::Continue => {}
        Step::NeedMore if self.exhausted => return self.finish(),
        Step::NeedMore => match self.chunks.next().await {
          Some(chunk) => self.buf.extend_from_slice(&chunk?),
          None => self.exhausted = true,
        },
      }
    }
  }

  fn finish(&self) -> Result<Option<JsonEvent>> {
    match self.state {
      State::Trailing => Ok(None),
      State::Start if self.buf.is_empty() => Ok(None),
      _ => Err(Error::Parse(
        "response body ended inside the JSON object".to_string(),
      )),
    }
  }

  fn advance(&mut self) -> Result<Step> {
    if self.scan.is_none() {
      let blank = self
        .buf
        .iter()
        .take_while(|b| b.is_ascii_whitespace())
        .count();
      self.buf.advance(blank);
    }
    let Some(&byte) = self.buf.first() else {
      return Ok(Step::NeedMore);
    };

    match self.state.clone() {
      State::Start => {
        self.expect(byte, b'{', "'{'")?;
        self.state = State::KeyOrEnd;
        Ok(Step::Continue)
      }
      State::KeyOrEnd if byte == b'}' => {
        self.buf.advance(1);
        self.state = State::Trailing;
        Ok(Step::Continue)
      }
      State::KeyOrEnd | State::Key => {
        if byte != b'"' {
          return Err(unexpected(byte, "a field name"));
        }
        match self.scan_value()? {
          Some(len) => {
            let key: String = serde_json::from_slice(&self.buf[..len])?;
            self.buf.advance(len);
            self.state = State::Colon(key);
            Ok(Step::Continue)
          }
          None => Ok(Step::NeedMore),
        }
      }
      State::Colon(key) => {
        self.expect(byte, b':', "':'")?;
        self.state = State::Value(key);
        Ok(Step::Continue)
      }
      State::Value(key) if byte == b'[' => {
        self.buf.advance(1);
        self.state = State::ItemOrEnd(format!("{}.item", key));
        Ok(Step::Continue)
      }
      State::Value(key) => match self.take_value()? {
        Some(value) => {
          self.state = State::AfterField;
          Ok(Step::Event(JsonEvent::new(key, value)))
        }
        None => Ok(Step::NeedMore),
      },
      State::AfterField => {
        self.buf.advance(1);
        match byte {
          b',' => self.state = State::Key,
          b'}' => self.state = State::Trailing,
          other => return Err(unexpected(other, "',' or '}'")),
        }
        Ok(Step::Continue)
      }
      State::ItemOrEnd(_) if byte == b']' => {
        self.buf.advance(1);
        self.state = State::AfterField;
        Ok(Step::Continue)
      }
      State::ItemOrEnd(path) | State::Item(path) => match self.take_value()? {
        Some(value) => {
          trace!(path = %path, "element complete");
          self.state = State::AfterItem(path.clone());
          Ok(Step::Event(JsonEvent::new(path, value)))
        }
        None => Ok(Step::NeedMore),
      },
      State::AfterItem(path) => {
        self.buf.advance(1);
        match byte {
          b',' => self.state = State::Item(path),
          b']' => self.state = State::AfterField,
          other => return Err(unexpected(other, "',' or ']'")),
        }
        Ok(Step::Continue)
      }
      State::Trailing => Err(unexpected(byte, "end of body")),
    }
  }

  fn expect(&mut self, byte: u8, wanted: u8, what: &str) -> Result<()> {
    if byte != wanted {
      return Err(unexpected(byte, what));
    }
    self.buf.advance(1);
    Ok(())
  }

  /// Length of the value at the front of the buffer, once it is complete.
  fn scan_value(&mut self) -> Result<Option<usize>> {
    let mut scan = match self.scan.take() {
      Some(scan) => scan,
      None => ValueScan::start(self.buf[0])?,
    };
    let len = scan.run(&self.buf);
    if len.is_none() {
      self.scan = Some(scan);
    }
    Ok(len)
  }

  fn take_value(&mut self) -> Result<Option<Value>> {
    let Some(len) = self.scan_value()? else {
      return Ok(None);
    };
    let value = serde_json::from_slice(&self.buf[..len])?;
    self.buf.advance(len);
    Ok(Some(value))
  }
}

fn unexpected(byte: u8, what: &str) -> Error {
  Error::Parse(format!(
    "unexpected '{}' while expecting {}",
    byte.escape_ascii(),
    what
  ))
}

/// Line-based event source for servers printing one value per line.
pub struct LineEvents {
  lines: LineReader,
  pending: VecDeque<JsonEvent>,
  header_read: bool,
  closed: bool,
  // text after the closing `]` of the rows
  trailer: Vec<u8>,
}

impl LineEvents {
  pub fn new(lines: LineReader) -> Self {
    Self {
      lines,
      pending: VecDeque::new(),
      header_read: false,
      closed: false,
      trailer: Vec::new(),
    }
  }

  pub async fn next_event(&mut self) -> Result<Option<JsonEvent>> {
    loop {
      if let Some(event) = self.pending.pop_front() {
        return Ok(Some(event));
      }

      let Some(line) = self.lines.next_line().await? else {
        if self.header_read && !self.closed {
          return Err(Error::Parse(
            "response body ended before the closing ']}'".to_string(),
          ));
        }
        self.read_trailer();
        if self.pending.is_empty() {
          return Ok(None);
        }
        continue;
      };
      let text = line.trim_ascii();
      if text.is_empty() {
        continue;
      }

      if !self.header_read {
        self.header_read = true;
        self.read_header(text)?;
        continue;
      }

      if self.closed {
        self.trailer.extend_from_slice(text);
        continue;
      }
      if let Some(rest) = text.strip_prefix(b"]") {
        self.closed = true;
        self.trailer.extend_from_slice(rest);
        continue;
      }

      let row = text.strip_suffix(b",").unwrap_or(text);
      match serde_json::from_slice(row) {
        Ok(value) => return Ok(Some(JsonEvent::new(ROW_PATH, value))),
        Err(e) if self.lines.is_finished() => return Err(e.into()),
        Err(e) => warn!(error = %e, "skipping malformed view row"),
      }
    }
  }

  /// The first line holds the opening of the object up to `"rows":[`.
  fn read_header(&mut self, text: &[u8]) -> Result<()> {
    let mut closed = text.to_vec();
    closed.extend_from_slice(b"]}");
    let header: Map<String, Value> = match serde_json::from_slice(&closed) {
      Ok(header) => header,
      Err(_) => {
        // the whole object fit on one line
        self.closed = true;
        serde_json::from_slice(text)?
      }
    };

    for (key, value) in header {
      match value {
        Value::Array(items) if key == "rows" => {
          self
            .pending
            .extend(items.into_iter().map(|row| JsonEvent::new(ROW_PATH, row)));
        }
        value => self.pending.push_back(JsonEvent::new(key, value)),
      }
    }
    Ok(())
  }

  /// Fields printed after the rows, e.g. `],"update_seq":"12-g1A"}`.
  fn read_trailer(&mut self) {
    let trailer = std::mem::take(&mut self.trailer);
    let Some(fields) = trailer.trim_ascii().strip_prefix(b",") else {
      return;
    };
    let mut object = b"{".to_vec();
    object.extend_from_slice(fields);
    match serde_json::from_slice::<Map<String, Value>>(&object) {
      Ok(fields) => self
        .pending
        .extend(fields.into_iter().map(|(k, v)| JsonEvent::new(k, v))),
      Err(e) => warn!(error = %e, "skipping malformed view trailer"),
    }
  }
}
