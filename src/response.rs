//! Synthetic response type.
//!
//! A [`Response`] is the in-progress answer a chain builds up. It has no wire
//! representation: nothing is ever written to a socket. Handlers never touch
//! it directly; they go through a [`ScopedResponse`](crate::ScopedResponse),
//! which decides whether a write is still allowed.

use std::collections::BTreeMap;
use std::fmt;

use http::StatusCode;
use serde::Serialize;
use serde_json::{Map, Value};

/// Called once, on the first `responded` false → true transition.
pub(crate) type FinishHook = Box<dyn FnOnce() + Send + 'static>;

/// A cookie set by a step, in the order it was set.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub options: Map<String, Value>,
}

/// Serializable copy of a response's state.
///
/// Used both as the `final` member of a [`RunResult`](crate::RunResult) and as
/// the image a timed-out step is rolled back to.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSnapshot {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub cookies: Vec<Cookie>,
    pub locals: Map<String, Value>,
    pub responded: bool,
    pub body: Option<Value>,
}

impl Default for ResponseSnapshot {
    fn default() -> Self {
        Self {
            status_code: StatusCode::OK.as_u16(),
            headers: BTreeMap::new(),
            cookies: Vec::new(),
            locals: Map::new(),
            responded: false,
            body: None,
        }
    }
}

/// The mutable response shared by every step of one run.
#[derive(Default)]
pub struct Response {
    state: ResponseSnapshot,
    on_finish: Option<FinishHook>,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Mutators ──────────────────────────────────────────────────────────────

    pub fn status(&mut self, code: u16) -> &mut Self {
        self.state.status_code = code;
        self
    }

    /// Sets a header, replacing any existing value. Names are lower-cased.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.state.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn cookie(
        &mut self,
        name: &str,
        value: impl Into<String>,
        options: Map<String, Value>,
    ) -> &mut Self {
        self.state.cookies.push(Cookie { name: name.to_owned(), value: value.into(), options });
        self
    }

    pub fn set_local(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.state.locals.insert(key.to_owned(), value.into());
        self
    }

    /// Writes a JSON body and sets `content-type: application/json`.
    pub fn json(&mut self, body: impl Into<Value>) -> &mut Self {
        self.set_header("content-type", "application/json");
        self.finish(body.into())
    }

    /// Writes a raw body. The content type is left alone.
    pub fn send(&mut self, body: impl Into<String>) -> &mut Self {
        self.finish(Value::String(body.into()))
    }

    /// Sets the status and answers with its reason phrase as the body.
    pub fn send_status(&mut self, code: u16) -> &mut Self {
        let reason = StatusCode::from_u16(code)
            .ok()
            .and_then(|s| s.canonical_reason())
            .map_or_else(|| code.to_string(), str::to_owned);
        self.status(code);
        self.set_header("content-type", "text/plain; charset=utf-8");
        self.finish(Value::String(reason))
    }

    fn finish(&mut self, body: Value) -> &mut Self {
        self.state.body = Some(body);
        if !self.state.responded {
            self.state.responded = true;
            if let Some(hook) = self.on_finish.take() {
                hook();
            }
        }
        self
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn status_code(&self) -> u16 { self.state.status_code }
    pub fn headers(&self) -> &BTreeMap<String, String> { &self.state.headers }
    pub fn cookies(&self) -> &[Cookie] { &self.state.cookies }
    pub fn locals(&self) -> &Map<String, Value> { &self.state.locals }
    pub fn responded(&self) -> bool { self.state.responded }
    pub fn body(&self) -> Option<&Value> { self.state.body.as_ref() }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.state.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn local(&self, key: &str) -> Option<&Value> {
        self.state.locals.get(key)
    }

    // ── Engine plumbing ───────────────────────────────────────────────────────

    pub fn snapshot(&self) -> ResponseSnapshot {
        self.state.clone()
    }

    pub(crate) fn restore(&mut self, snapshot: ResponseSnapshot) {
        self.state = snapshot;
    }

    /// Installs the hook for the step about to run, replacing any leftover.
    pub(crate) fn set_finish_hook(&mut self, hook: Option<FinishHook>) {
        self.on_finish = hook;
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("state", &self.state)
            .field("on_finish", &self.on_finish.is_some())
            .finish()
    }
}
