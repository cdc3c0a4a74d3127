//! Continuous changes feed.

use futures::stream::{self, Stream};
use serde_json::Value;
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::lines::LineReader;
use crate::protocol::ChangeEvent;
use crate::transport::Response;

/// Events of a continuous changes feed, one per line of the response body.
///
/// The feed has no natural end: it stops when the server closes the
/// connection or when the consumer is dropped. There is no reconnect; resume
/// from the last seen [`ChangeEvent::seq`] with `ChangesQuery::since`.
pub struct Changes {
  lines: LineReader,
  heartbeats: bool,
}

impl Changes {
  /// Wraps a streaming response; `heartbeats` turns keep-alive lines into
  /// [`ChangeEvent::Heartbeat`] events instead of skipping them.
  pub fn from_response(response: Response, heartbeats: bool) -> Result<Self> {
    if !response.is_success() {
      return Err(Error::Remote {
        status: response.status(),
      });
    }
    Ok(Self {
      lines: response.into_lines(),
      heartbeats,
    })
  }

  /// Waits for the next event; `None` once the server closed the feed.
  pub async fn next(&mut self) -> Result<Option<ChangeEvent>> {
    loop {
      let Some(line) = self.lines.next_line().await? else {
        return Ok(None);
      };

      if line.trim_ascii().is_empty() {
        if self.heartbeats {
          trace!("heartbeat");
          return Ok(Some(ChangeEvent::Heartbeat));
        }
        continue;
      }

      match serde_json::from_slice::<Value>(&line) {
        Ok(change) => return Ok(Some(ChangeEvent::Change(change))),
        Err(e) => warn!(error = %e, "skipping malformed change line"),
      }
    }
  }

  pub fn into_stream(self) -> impl Stream<Item = Result<ChangeEvent>> {
    stream::try_unfold(self, |mut changes| async move {
      let event = changes.next().await?;
      Ok::<_, Error>(event.map(|event| (event, changes)))
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  use bytes::Bytes;
  use futures::channel::mpsc;
  use futures::{StreamExt, TryStreamExt};
  use serde_json::json;

  fn response(body: &str) -> Response {
    Response::new(200, HashMap::new(), body.to_string())
  }

  async fn values(changes: Changes) -> Vec<Value> {
    changes
      .into_stream()
      .map_ok(ChangeEvent::into_value)
      .try_collect()
      .await
      .unwrap()
  }

  #[tokio::test]
  async fn test_heartbeats_passed_through() {
    let changes = Changes::from_response(response("{\"a\":1}\n\n{\"b\":2}\n"), true).unwrap();
    assert_eq!(
      values(changes).await,
      vec![json!({"a": 1}), json!({}), json!({"b": 2})]
    );
  }

  #[tokio::test]
  async fn test_heartbeats_suppressed() {
    let changes = Changes::from_response(response("{\"a\":1}\n\n{\"b\":2}\n"), false).unwrap();
    assert_eq!(values(changes).await, vec![json!({"a": 1}), json!({"b": 2})]);
  }

  #[tokio::test]
  async fn test_malformed_line_skipped() {
    let changes = Changes::from_response(response("{\"a\":1}\n{oops\n{\"b\":2}"), false).unwrap();
    assert_eq!(values(changes).await, vec![json!({"a": 1}), json!({"b": 2})]);
  }

  #[tokio::test]
  async fn test_remote_error() {
    let resp = Response::new(400, HashMap::new(), "{}");
    assert!(matches!(
      Changes::from_response(resp, false),
      Err(Error::Remote { status: 400 })
    ));
  }

  #[tokio::test]
  async fn test_events_arrive_as_lines_complete() {
    let (tx, rx) = mpsc::unbounded::<Result<Bytes>>();
    let resp = Response::streaming(200, HashMap::new(), rx.boxed());
    let mut changes = Changes::from_response(resp, true).unwrap();

    tx.unbounded_send(Ok(Bytes::from_static(b"{\"seq\":1,\"id\":\"a\"}\n{\"seq\""))).unwrap();
    let event = changes.next().await.unwrap().unwrap();
    assert_eq!(event.seq(), Some(&json!(1)));
    assert_eq!(event.id(), Some("a"));

    tx.unbounded_send(Ok(Bytes::from_static(b":2,\"id\":\"b\",\"deleted\":true}\n\n"))).unwrap();
    let event = changes.next().await.unwrap().unwrap();
    assert!(event.deleted());
    assert!(changes.next().await.unwrap().unwrap().is_heartbeat());

    drop(tx);
    assert!(changes.next().await.unwrap().is_none());
  }
}
