//! Splits a chunked response body into lines.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;

use crate::error::Result;
use crate::transport::ChunkStream;

/// Pulls chunks on demand and hands out one line at a time.
///
/// At most one partial line is buffered.
pub struct LineReader {
  chunks: ChunkStream,
  buf: BytesMut,
  // bytes of `buf` already known to hold no newline
  searched: usize,
  exhausted: bool,
}

impl LineReader {
  pub fn new(chunks: ChunkStream) -> Self {
    Self {
      chunks,
      buf: BytesMut::new(),
      searched: 0,
      exhausted: false,
    }
  }

  /// Next line without its `\n` / `\r\n` terminator, or `None` once the body
  /// is exhausted.
  pub async fn next_line(&mut self) -> Result<Option<Bytes>> {
    loop {
      if let Some(pos) = self.buf[self.searched..].iter().position(|&b| b == b'\n') {
        let end = self.searched + pos;
        let line = self.buf.split_to(end + 1);
        self.searched = 0;
        return Ok(Some(strip_terminator(line)));
      }
      self.searched = self.buf.len();

      if self.exhausted {
        if self.buf.is_empty() {
          return Ok(None);
        }
        self.searched = 0;
        return Ok(Some(strip_terminator(self.buf.split())));
      }

      match self.chunks.next().await {
        Some(chunk) => self.buf.extend_from_slice(&chunk?),
        None => self.exhausted = true,
      }
    }
  }

  /// Whether the body has ended. A line returned while this holds was not
  /// newline-terminated.
  pub fn is_finished(&self) -> bool {
    self.exhausted
  }
}

fn strip_terminator(mut line: BytesMut) -> Bytes {
  if line.last() == Some(&b'\n') {
    line.truncate(line.len() - 1);
  }
  if line.last() == Some(&b'\r') {
    line.truncate(line.len() - 1);
  }
  line.freeze()
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::stream;

  fn reader(chunks: &[&'static [u8]]) -> LineReader {
    let chunks: Vec<Result<Bytes>> = chunks.iter().map(|c| Ok(Bytes::from_static(c))).collect();
    LineReader::new(stream::iter(chunks).boxed())
  }

  async fn collect(mut reader: LineReader) -> Vec<Bytes> {
    let mut lines = Vec::new();
    while let Some(line) = reader.next_line().await.unwrap() {
      lines.push(line);
    }
    lines
  }

  #[tokio::test]
  async fn test_lines_across_chunks() {
    let lines = collect(reader(&[b"{\"a\"", b":1}\n\n{\"b", b"\":2}\r\n"])).await;
    assert_eq!(lines, vec!["{\"a\":1}", "", "{\"b\":2}"]);
  }

  #[tokio::test]
  async fn test_unterminated_tail() {
    let mut r = reader(&[b"one\ntwo"]);
    assert_eq!(r.next_line().await.unwrap().unwrap(), "one");
    assert!(!r.is_finished());
    assert_eq!(r.next_line().await.unwrap().unwrap(), "two");
    assert!(r.is_finished());
    assert!(r.next_line().await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_empty_body() {
    assert!(collect(reader(&[])).await.is_empty());
  }
}
