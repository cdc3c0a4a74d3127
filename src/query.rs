//! Query builders for views and the changes feed
//!
//! Options travel as URL parameters: `key`, `startkey`, `endkey` and every
//! non-string value are JSON-encoded, other strings are sent as they are.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde_json::{json, Value};

use crate::error::{Error, Result};

/// Options that are always JSON-encoded, even when given as strings
const JSON_OPTIONS: [&str; 3] = ["key", "startkey", "endkey"];

/// Databases whose names escape the usual naming rule
const SYSTEM_DATABASES: [&str; 3] = ["_users", "_replicator", "_global_changes"];

/// Encode named options into query parameters
pub fn encode_options(options: &[(String, Value)]) -> Vec<(String, String)> {
    options
        .iter()
        .map(|(name, value)| {
            let encoded = match value {
                Value::String(s) if !JSON_OPTIONS.contains(&name.as_str()) => s.clone(),
                other => other.to_string(),
            };
            (name.clone(), encoded)
        })
        .collect()
}

fn set_option(options: &mut Vec<(String, Value)>, name: &str, value: Value) {
    match options.iter_mut().find(|(n, _)| n == name) {
        Some(slot) => slot.1 = value,
        None => options.push((name.to_string(), value)),
    }
}

/// Query parameters for a view request
///
/// # Example
/// ```
/// use coucher::query::ViewQuery;
///
/// let query = ViewQuery::new()
///     .start_key("a")
///     .limit(10)
///     .include_docs(true);
/// assert_eq!(query.params()[0], ("startkey".to_string(), "\"a\"".to_string()));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ViewQuery {
    options: Vec<(String, Value)>,
    keys: Option<Vec<Value>>,
}

impl ViewQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only rows whose key equals `key`
    pub fn key(self, key: impl Into<Value>) -> Self {
        self.option("key", key)
    }

    /// Only rows with one of these keys; the request becomes a POST
    pub fn keys(mut self, keys: Vec<Value>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn start_key(self, key: impl Into<Value>) -> Self {
        self.option("startkey", key)
    }

    pub fn end_key(self, key: impl Into<Value>) -> Self {
        self.option("endkey", key)
    }

    pub fn limit(self, n: usize) -> Self {
        self.option("limit", n)
    }

    pub fn skip(self, n: usize) -> Self {
        self.option("skip", n)
    }

    pub fn descending(self, descending: bool) -> Self {
        self.option("descending", descending)
    }

    pub fn include_docs(self, include: bool) -> Self {
        self.option("include_docs", include)
    }

    pub fn inclusive_end(self, inclusive: bool) -> Self {
        self.option("inclusive_end", inclusive)
    }

    pub fn reduce(self, reduce: bool) -> Self {
        self.option("reduce", reduce)
    }

    pub fn group(self, group: bool) -> Self {
        self.option("group", group)
    }

    pub fn group_level(self, level: u32) -> Self {
        self.option("group_level", level)
    }

    /// Ask the server to report its `update_seq`
    pub fn update_seq(self, include: bool) -> Self {
        self.option("update_seq", include)
    }

    /// Any other view option
    pub fn option(mut self, name: &str, value: impl Into<Value>) -> Self {
        set_option(&mut self.options, name, value.into());
        self
    }

    pub fn params(&self) -> Vec<(String, String)> {
        encode_options(&self.options)
    }

    /// Request body when keys were given
    pub fn keys_body(&self) -> Option<Value> {
        self.keys.as_ref().map(|keys| json!({ "keys": keys }))
    }
}

/// Changes feed delivery mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Feed {
    Normal,
    Longpoll,
    #[default]
    Continuous,
    EventSource,
}

impl Feed {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feed::Normal => "normal",
            Feed::Longpoll => "longpoll",
            Feed::Continuous => "continuous",
            Feed::EventSource => "eventsource",
        }
    }
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feed {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "normal" => Ok(Feed::Normal),
            "longpoll" => Ok(Feed::Longpoll),
            "continuous" => Ok(Feed::Continuous),
            "eventsource" => Ok(Feed::EventSource),
            other => Err(Error::NotSupported(other.to_string())),
        }
    }
}

/// Query parameters for a changes feed request
///
/// # Example
/// ```
/// use std::time::Duration;
/// use coucher::query::ChangesQuery;
///
/// let query = ChangesQuery::new()
///     .include_docs(true)
///     .since("now")
///     .heartbeat(Duration::from_secs(10))
///     .yield_heartbeats(true);
/// assert!(query.heartbeats());
/// ```
#[derive(Debug, Clone)]
pub struct ChangesQuery {
    feed: Feed,
    // feed name given through `option` that no `Feed` matches
    unknown_feed: Option<String>,
    include_docs: bool,
    heartbeats: bool,
    options: Vec<(String, Value)>,
}

impl Default for ChangesQuery {
    fn default() -> Self {
        Self {
            feed: Feed::Continuous,
            unknown_feed: None,
            include_docs: false,
            heartbeats: false,
            options: Vec::new(),
        }
    }
}

impl ChangesQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(mut self, feed: Feed) -> Self {
        self.feed = feed;
        self.unknown_feed = None;
        self
    }

    pub fn include_docs(mut self, include: bool) -> Self {
        self.include_docs = include;
        self
    }

    /// Emit a heartbeat event for every keep-alive line instead of skipping it
    pub fn yield_heartbeats(mut self, yield_beats: bool) -> Self {
        self.heartbeats = yield_beats;
        self
    }

    /// Start after this sequence marker (or `"now"`)
    pub fn since(self, seq: impl Into<Value>) -> Self {
        self.option("since", seq)
    }

    /// Interval at which the server sends keep-alive lines
    pub fn heartbeat(self, interval: Duration) -> Self {
        self.option("heartbeat", interval.as_millis() as u64)
    }

    /// Server-side idle timeout after which the feed is closed
    pub fn timeout(self, timeout: Duration) -> Self {
        self.option("timeout", timeout.as_millis() as u64)
    }

    pub fn filter(self, name: impl Into<String>) -> Self {
        self.option("filter", name.into())
    }

    pub fn limit(self, n: usize) -> Self {
        self.option("limit", n)
    }

    pub fn descending(self, descending: bool) -> Self {
        self.option("descending", descending)
    }

    /// `main_only` or `all_docs`
    pub fn style(self, style: impl Into<String>) -> Self {
        self.option("style", style.into())
    }

    /// Any other changes option
    ///
    /// `feed` and `include_docs` set the same state as their typed builders.
    pub fn option(mut self, name: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        match name {
            "feed" => {
                let name = match &value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                match name.parse::<Feed>() {
                    Ok(feed) => return self.feed(feed),
                    Err(_) => self.unknown_feed = Some(name),
                }
            }
            "include_docs" => {
                self.include_docs = matches!(&value, Value::Bool(true))
                    || matches!(&value, Value::String(s) if s == "true");
            }
            _ => set_option(&mut self.options, name, value),
        }
        self
    }

    /// The requested feed; an unrecognized feed name is `NotSupported`
    pub fn feed_mode(&self) -> Result<Feed> {
        match &self.unknown_feed {
            Some(name) => Err(Error::NotSupported(name.clone())),
            None => Ok(self.feed),
        }
    }

    pub fn heartbeats(&self) -> bool {
        self.heartbeats
    }

    pub fn params(&self) -> Vec<(String, String)> {
        let feed = self.unknown_feed.as_deref().unwrap_or(self.feed.as_str());
        let mut options = vec![
            ("feed".to_string(), Value::from(feed)),
            ("include_docs".to_string(), Value::from(self.include_docs)),
        ];
        options.extend(self.options.iter().cloned());
        encode_options(&options)
    }
}

/// Path of `name` inside database `db`
///
/// `design/view` maps to the view `view` of design document `_design/design`;
/// names starting with `_` (like `_all_docs`) are taken as they are.
pub fn view_path(db: &str, name: &str) -> Result<String> {
    let db = urlencoding::encode(db);

    if name.starts_with('_') {
        let segments: Vec<_> = name.split('/').map(urlencoding::encode).collect();
        return Ok(format!("/{}/{}", db, segments.join("/")));
    }

    match name.split_once('/') {
        Some((design, view)) if !design.is_empty() && !view.is_empty() => Ok(format!(
            "/{}/_design/{}/_view/{}",
            db,
            urlencoding::encode(design),
            urlencoding::encode(view)
        )),
        _ => Err(Error::InvalidName(format!(
            "view '{}' is neither 'design/view' nor a special '_' view",
            name
        ))),
    }
}

/// Path of document `id` inside database `db`
pub fn document_path(db: &str, id: &str) -> String {
    let db = urlencoding::encode(db);
    for prefix in ["_design/", "_local/"] {
        if let Some(rest) = id.strip_prefix(prefix) {
            return format!("/{}/{}{}", db, prefix, urlencoding::encode(rest));
        }
    }
    format!("/{}/{}", db, urlencoding::encode(id))
}

/// Path of database `db`
pub fn database_path(db: &str) -> String {
    format!("/{}", urlencoding::encode(db))
}

/// Check `name` against the server's database naming rule
pub fn validate_db_name(name: &str) -> Result<&str> {
    static VALID_NAME: OnceLock<Regex> = OnceLock::new();

    if SYSTEM_DATABASES.contains(&name) {
        return Ok(name);
    }

    let pattern = VALID_NAME
        .get_or_init(|| Regex::new(r"^[a-z][a-z0-9_$()+/-]*$").expect("database name pattern"));
    if pattern.is_match(name) {
        Ok(name)
    } else {
        Err(Error::InvalidName(format!("invalid database name '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_options() {
        let params = encode_options(&[
            ("key".to_string(), json!("abc")),
            ("stale".to_string(), json!("ok")),
            ("limit".to_string(), json!(5)),
            ("startkey".to_string(), json!(["a", 1])),
        ]);
        assert_eq!(
            params,
            vec![
                ("key".to_string(), "\"abc\"".to_string()),
                ("stale".to_string(), "ok".to_string()),
                ("limit".to_string(), "5".to_string()),
                ("startkey".to_string(), "[\"a\",1]".to_string()),
            ]
        );
    }

    #[test]
    fn test_option_replaces_previous_value() {
        let query = ViewQuery::new().limit(5).limit(10);
        assert_eq!(query.params(), vec![("limit".to_string(), "10".to_string())]);
    }

    #[test]
    fn test_view_path() {
        assert_eq!(view_path("db", "_all_docs").unwrap(), "/db/_all_docs");
        assert_eq!(
            view_path("db", "app/by_name").unwrap(),
            "/db/_design/app/_view/by_name"
        );
        assert!(matches!(view_path("db", "plain"), Err(Error::InvalidName(_))));
    }

    #[test]
    fn test_document_path() {
        assert_eq!(document_path("db", "doc 1"), "/db/doc%201");
        assert_eq!(document_path("db", "a/b"), "/db/a%2Fb");
        assert_eq!(document_path("db", "_design/app"), "/db/_design/app");
        assert_eq!(document_path("my/db", "x"), "/my%2Fdb/x");
    }

    #[test]
    fn test_feed_from_str() {
        assert_eq!("continuous".parse::<Feed>().unwrap(), Feed::Continuous);
        assert_eq!("longpoll".parse::<Feed>().unwrap(), Feed::Longpoll);
        assert!(matches!("websocket".parse::<Feed>(), Err(Error::NotSupported(f)) if f == "websocket"));
    }
}
