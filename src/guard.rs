//! Step isolation.
//!
//! Every step gets a [`ScopedResponse`] carrying a [`StepToken`]. Writes go
//! through only while that token is the one the runner marked active; once
//! the runner retires the step, the same handle silently drops writes. A
//! handler that left a timer or a spawned task behind therefore cannot touch
//! the response attributed to later steps.
//!
//! The active check and the write happen under one lock, so a retire and a
//! late write can never interleave half-way. The window also closes the
//! moment the step resolves, under the same lock that records the
//! resolution: a write that finishes the response seals it on the spot, and
//! the continuation and the deadline go through [`ScopedResponse::seal`].
//! Whatever the handler does after that is dropped, no matter how quickly
//! it runs or on which worker thread.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use tracing::trace;

use crate::response::{FinishHook, Response, ResponseSnapshot};

/// Capability identifying one step of one run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StepToken(u64);

struct Inner {
    response: Response,
    active: Option<StepToken>,
    issued: u64,
}

/// Owner of the run's shared response.
///
/// Only the runner activates and retires tokens; the scheduler and the
/// handlers see nothing but scoped handles.
pub(crate) struct Stage {
    inner: Mutex<Inner>,
}

impl Stage {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner { response: Response::new(), active: None, issued: 0 }),
        })
    }

    // Handlers never run while the lock is held, so a poisoned mutex can only
    // come from a panic in this module; the data is still consistent.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issues a fresh token, makes it the active one and installs `hook` as
    /// the response's finish notification.
    pub(crate) fn activate(&self, hook: FinishHook) -> StepToken {
        let mut inner = self.lock();
        debug_assert!(inner.active.is_none(), "previous step was never retired");
        inner.issued += 1;
        let token = StepToken(inner.issued);
        inner.active = Some(token);
        inner.response.set_finish_hook(Some(hook));
        token
    }

    /// Ends `token`'s window. With `rollback`, the response is rewound to it
    /// in the same critical section.
    ///
    /// Returns the snapshot of the response after the step.
    pub(crate) fn retire(
        &self,
        token: StepToken,
        rollback: Option<ResponseSnapshot>,
    ) -> ResponseSnapshot {
        let mut inner = self.lock();
        if inner.active == Some(token) {
            inner.active = None;
        }
        inner.response.set_finish_hook(None);
        if let Some(snapshot) = rollback {
            inner.response.restore(snapshot);
        }
        inner.response.snapshot()
    }

    pub(crate) fn snapshot(&self) -> ResponseSnapshot {
        self.lock().response.snapshot()
    }

    pub(crate) fn scope(self: &Arc<Self>, token: StepToken) -> ScopedResponse {
        ScopedResponse { stage: Arc::clone(self), token }
    }
}

/// A step's view of the shared response.
///
/// Cheap to clone and `Send`, so a handler can move it into a spawned task.
/// Reads always see the live response. Writes are applied only while the
/// owning step is active; afterwards they are dropped without error.
///
/// Mutators return `&Self` so calls chain:
///
/// ```rust,ignore
/// res.status(201).set_header("location", "/users/7").json(json!({ "id": 7 }));
/// ```
#[derive(Clone)]
pub struct ScopedResponse {
    stage: Arc<Stage>,
    token: StepToken,
}

impl ScopedResponse {
    pub fn token(&self) -> StepToken {
        self.token
    }

    /// `true` while writes through this handle still land.
    pub fn is_active(&self) -> bool {
        self.stage.lock().active == Some(self.token)
    }

    fn write(&self, op: &'static str, f: impl FnOnce(&mut Response)) -> &Self {
        let mut inner = self.stage.lock();
        if inner.active == Some(self.token) {
            let was_responded = inner.response.responded();
            f(&mut inner.response);
            // The finish hook has just resolved the step.
            if !was_responded && inner.response.responded() {
                inner.active = None;
            }
        } else {
            trace!(token = ?self.token, op, "dropped write from retired step");
        }
        self
    }

    /// Runs `settle` under the stage lock. If it reports that it ended the
    /// step, this handle's window is closed before the lock is released.
    ///
    /// `settle` must not touch the response.
    pub(crate) fn seal(&self, settle: impl FnOnce() -> bool) -> bool {
        let mut inner = self.stage.lock();
        let ended = settle();
        if ended && inner.active == Some(self.token) {
            inner.active = None;
        }
        ended
    }

    fn read<R>(&self, f: impl FnOnce(&Response) -> R) -> R {
        f(&self.stage.lock().response)
    }

    // ── Writes ────────────────────────────────────────────────────────────────

    pub fn status(&self, code: u16) -> &Self {
        self.write("status", |r| { r.status(code); })
    }

    pub fn set_header(&self, name: &str, value: impl Into<String>) -> &Self {
        let value = value.into();
        self.write("set_header", |r| { r.set_header(name, value); })
    }

    pub fn cookie(&self, name: &str, value: impl Into<String>) -> &Self {
        self.cookie_with(name, value, Map::new())
    }

    pub fn cookie_with(
        &self,
        name: &str,
        value: impl Into<String>,
        options: Map<String, Value>,
    ) -> &Self {
        let value = value.into();
        self.write("cookie", |r| { r.cookie(name, value, options); })
    }

    pub fn set_local(&self, key: &str, value: impl Into<Value>) -> &Self {
        let value = value.into();
        self.write("set_local", |r| { r.set_local(key, value); })
    }

    pub fn json(&self, body: impl Into<Value>) -> &Self {
        let body = body.into();
        self.write("json", |r| { r.json(body); })
    }

    pub fn send(&self, body: impl Into<String>) -> &Self {
        let body = body.into();
        self.write("send", |r| { r.send(body); })
    }

    pub fn send_status(&self, code: u16) -> &Self {
        self.write("send_status", |r| { r.send_status(code); })
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    pub fn status_code(&self) -> u16 {
        self.read(Response::status_code)
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.read(|r| r.header(name).map(str::to_owned))
    }

    pub fn local(&self, key: &str) -> Option<Value> {
        self.read(|r| r.local(key).cloned())
    }

    pub fn responded(&self) -> bool {
        self.read(Response::responded)
    }

    pub fn body(&self) -> Option<Value> {
        self.read(|r| r.body().cloned())
    }

    pub fn snapshot(&self) -> ResponseSnapshot {
        self.read(Response::snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn noop() -> FinishHook {
        Box::new(|| {})
    }

    #[test]
    fn active_handle_writes_through() {
        let stage = Stage::new();
        let token = stage.activate(noop());
        let res = stage.scope(token);

        res.status(418).set_header("X-Kind", "teapot").set_local("brewed", true);
        assert!(res.is_active());
        assert_eq!(res.status_code(), 418);
        assert_eq!(res.header("x-kind").as_deref(), Some("teapot"));
        assert_eq!(res.local("brewed"), Some(json!(true)));
    }

    #[test]
    fn retired_handle_drops_writes_but_still_reads() {
        let stage = Stage::new();
        let token = stage.activate(noop());
        let res = stage.scope(token);
        res.set_local("step", 1);
        stage.retire(token, None);

        res.set_local("step", 2).status(500).json(json!({ "late": true }));
        assert!(!res.is_active());
        assert_eq!(res.local("step"), Some(json!(1)));
        assert_eq!(res.status_code(), 200);
        assert!(!res.responded());
    }

    #[test]
    fn stale_handle_cannot_write_into_the_next_step() {
        let stage = Stage::new();
        let first = stage.activate(noop());
        let stale = stage.scope(first);
        stage.retire(first, None);

        let second = stage.activate(noop());
        let current = stage.scope(second);
        current.set_header("x-owner", "second");
        stale.set_header("x-owner", "first");

        assert_eq!(current.header("x-owner").as_deref(), Some("second"));
        assert_ne!(first, second);
    }

    #[test]
    fn retire_with_rollback_restores_the_image() {
        let stage = Stage::new();
        let before = stage.snapshot();
        let token = stage.activate(noop());
        let res = stage.scope(token);
        res.status(503).cookie("sid", "x").set_local("half", "done");

        let after = stage.retire(token, Some(before.clone()));
        assert_eq!(after, before);
        assert_eq!(stage.snapshot(), before);
    }

    #[test]
    fn finishing_the_response_closes_the_window() {
        let stage = Stage::new();
        let token = stage.activate(noop());
        let res = stage.scope(token);

        res.status(201).json(json!({ "id": 7 }));
        res.status(500).set_header("x-after", "1");
        assert!(!res.is_active());
        assert_eq!(res.status_code(), 201);
        assert!(res.header("x-after").is_none());

        let after = stage.retire(token, None);
        assert!(after.responded);
    }

    #[test]
    fn sealing_closes_the_window_only_when_it_ends_the_step() {
        let stage = Stage::new();
        let token = stage.activate(noop());
        let res = stage.scope(token);

        assert!(!res.seal(|| false));
        res.set_local("kept", true);
        assert!(res.is_active());

        assert!(res.seal(|| true));
        res.set_local("dropped", true);
        assert!(!res.is_active());
        assert_eq!(res.local("kept"), Some(json!(true)));
        assert_eq!(res.local("dropped"), None);
    }

    #[test]
    fn finish_hook_is_cleared_on_retire() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let stage = Stage::new();
        let token = stage.activate(Box::new(move || flag.store(true, Ordering::SeqCst)));
        stage.retire(token, None);

        let next = stage.activate(noop());
        stage.scope(next).send("done");
        assert!(!fired.load(Ordering::SeqCst));
    }
}
