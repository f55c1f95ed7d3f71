//! Single-step execution.
//!
//! A step resolves on whichever comes first:
//!
//! 1. its continuation is called ([`Next::proceed`] or [`Next::fail`]);
//! 2. it writes a response body (the response's finish hook fires);
//! 3. its future resolves to `Err` or panics, or invoking it panics;
//! 4. the per-step deadline passes.
//!
//! Signals 1 and 2 and the task failures in 3 all go through one [`Settle`],
//! a single-fire sender: whoever fires first decides, later signals are
//! ignored. The deadline claims the same sender, so it only wins if nothing
//! else has. Whichever path ends the step closes its write window in the
//! same critical section. The handler future is spawned, so a step that
//! times out keeps running in the background. Activating and retiring tokens
//! is the runner's job.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinError;
use tokio::time::{self, Instant};
use tracing::warn;

use crate::guard::ScopedResponse;
use crate::handler::{BoxedMiddleware, Next};
use crate::request::Request;
use crate::response::FinishHook;

/// Completion signals a running step can send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Signal {
    Proceed,
    Responded,
    Failed(String),
}

type Slot = Arc<Mutex<Option<oneshot::Sender<Signal>>>>;

fn take(slot: &Slot) -> Option<oneshot::Sender<Signal>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Returns `true` if this call was the one that ended the step.
fn send(slot: &Slot, signal: Signal) -> bool {
    match take(slot) {
        Some(tx) => {
            // The receiver is gone only once the scheduler has moved on.
            let _ = tx.send(signal);
            true
        }
        None => false,
    }
}

/// Single-fire resolution channel shared by everything that can end a step.
///
/// Firing also closes the step's write window, under the same lock, so
/// nothing the handler does afterwards reaches the response.
#[derive(Clone)]
pub(crate) struct Settle {
    scope: ScopedResponse,
    slot: Slot,
}

impl Settle {
    /// Returns `false` if the step was already resolved.
    pub(crate) fn fire(&self, signal: Signal) -> bool {
        self.scope.seal(|| send(&self.slot, signal))
    }

    /// Claims the step for the deadline. Loses to any signal fired first.
    fn expire(&self) -> bool {
        self.scope.seal(|| take(&self.slot).is_some())
    }
}

/// The resolution channel for one step, created before the step's token is
/// activated so the response's finish hook can point at it.
pub(crate) struct Pending {
    slot: Slot,
    rx: oneshot::Receiver<Signal>,
}

impl Pending {
    pub(crate) fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self { slot: Arc::new(Mutex::new(Some(tx))), rx }
    }

    /// Runs inside a write, with the stage lock held. The write itself
    /// closes the window.
    pub(crate) fn finish_hook(&self) -> FinishHook {
        let slot = Arc::clone(&self.slot);
        Box::new(move || {
            send(&slot, Signal::Responded);
        })
    }
}

/// How a step's race ended, before the runner looks at the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Resolution {
    Proceeded,
    Responded,
    Failed(String),
    TimedOut,
}

impl From<Signal> for Resolution {
    fn from(signal: Signal) -> Self {
        match signal {
            Signal::Proceed => Self::Proceeded,
            Signal::Responded => Self::Responded,
            Signal::Failed(msg) => Self::Failed(msg),
        }
    }
}

/// Runs one handler and waits for it to resolve.
///
/// Returns the resolution and the wall-clock time the step took.
pub(crate) async fn execute(
    handler: &BoxedMiddleware,
    req: Arc<Request>,
    res: ScopedResponse,
    pending: Pending,
    limit: Duration,
) -> (Resolution, Duration) {
    let started = Instant::now();
    let Pending { slot, mut rx } = pending;
    let settle = Settle { scope: res.clone(), slot };
    let next = Next::new(settle.clone());

    let fut = match panic::catch_unwind(AssertUnwindSafe(|| handler.call(req, res, next))) {
        Ok(fut) => fut,
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            warn!(error = %msg, "handler panicked while being invoked");
            settle.fire(Signal::Failed(msg.clone()));
            return (Resolution::Failed(msg), started.elapsed());
        }
    };

    let mut task = tokio::spawn(fut);
    let mut task_live = true;
    let deadline = time::sleep(limit);
    tokio::pin!(deadline);

    let resolution = loop {
        tokio::select! {
            // Signals first: a step that resolved right at the deadline
            // still counts as resolved.
            biased;

            signal = &mut rx => {
                // Only `expire` drops the sender unsent, and it breaks out
                // right away.
                break signal.map_or_else(
                    |_| Resolution::Failed("continuation dropped".to_owned()),
                    Resolution::from,
                );
            }

            joined = &mut task, if task_live => {
                task_live = false;
                match joined {
                    // Completed without signalling: the continuation may have
                    // been moved elsewhere, so keep waiting.
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        settle.fire(Signal::Failed(err.to_string()));
                    }
                    Err(err) => {
                        let msg = join_failure(err);
                        warn!(error = %msg, "handler task failed");
                        settle.fire(Signal::Failed(msg));
                    }
                }
            }

            () = &mut deadline => {
                if settle.expire() {
                    break Resolution::TimedOut;
                }
                // A signal got in first; `rx` is ready on the next pass.
            }
        }
    };

    // Dropping the JoinHandle detaches the task; a timed-out handler is never
    // aborted, only cut off by the guard.
    drop(task);
    (resolution, started.elapsed())
}

fn join_failure(err: JoinError) -> String {
    if err.is_panic() {
        panic_message(err.into_panic().as_ref())
    } else {
        "handler task was cancelled".to_owned()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::Stage;
    use crate::step::Step;
    use serde_json::json;

    async fn race(step: &Step, limit: Duration) -> (Resolution, Duration) {
        let stage = Stage::new();
        let pending = Pending::new();
        let token = stage.activate(pending.finish_hook());
        execute(step.handler(), Arc::new(Request::default()), stage.scope(token), pending, limit)
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn proceed_resolves_immediately() {
        let step = Step::new("pass", |_req, _res, next: Next| async move { next.proceed() });
        let (resolution, elapsed) = race(&step, Duration::from_secs(2)).await;
        assert_eq!(resolution, Resolution::Proceeded);
        assert!(elapsed < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn fail_carries_the_message() {
        let step = Step::new("deny", |_req, _res, next: Next| async move { next.fail("nope") });
        let (resolution, _) = race(&step, Duration::from_secs(2)).await;
        assert_eq!(resolution, Resolution::Failed("nope".to_owned()));
    }

    #[tokio::test(start_paused = true)]
    async fn writing_a_body_resolves_without_next() {
        let step = Step::new("answer", |_req, res: ScopedResponse, _next| async move {
            res.json(json!({ "ok": true }));
        });
        let (resolution, _) = race(&step, Duration::from_secs(2)).await;
        assert_eq!(resolution, Resolution::Responded);
    }

    #[tokio::test(start_paused = true)]
    async fn first_signal_wins() {
        let step = Step::new("both", |_req, res: ScopedResponse, next: Next| async move {
            res.send("done");
            next.fail("too late");
        });
        let (resolution, _) = race(&step, Duration::from_secs(2)).await;
        assert_eq!(resolution, Resolution::Responded);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_future_is_a_failure() {
        let step = Step::new("reject", |_req, _res, _next| async move {
            Err::<(), _>("database unreachable")
        });
        let (resolution, _) = race(&step, Duration::from_secs(2)).await;
        assert_eq!(resolution, Resolution::Failed("database unreachable".to_owned()));
    }

    #[tokio::test(start_paused = true)]
    async fn panic_inside_the_future_is_a_failure() {
        async fn kaboom() {
            panic!("kaboom")
        }
        let step = Step::new("boom", |_req, _res, _next| kaboom());
        let (resolution, elapsed) = race(&step, Duration::from_secs(2)).await;
        assert_eq!(resolution, Resolution::Failed("kaboom".to_owned()));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn silence_times_out() {
        let step = Step::new("hang", |_req, _res, next: Next| async move {
            // Held, never called.
            time::sleep(Duration::from_secs(60)).await;
            drop(next);
        });
        let (resolution, elapsed) = race(&step, Duration::from_millis(250)).await;
        assert_eq!(resolution, Resolution::TimedOut);
        assert!(elapsed >= Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn completing_without_a_signal_still_waits() {
        let step = Step::new("idle", |_req, _res, _next| async move {});
        let (resolution, _) = race(&step, Duration::from_millis(100)).await;
        assert_eq!(resolution, Resolution::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn continuation_moved_into_a_task_still_counts() {
        let step = Step::new("deferred", |_req, _res, next: Next| async move {
            tokio::spawn(async move {
                time::sleep(Duration::from_millis(50)).await;
                next.proceed();
            });
        });
        let (resolution, elapsed) = race(&step, Duration::from_secs(1)).await;
        assert_eq!(resolution, Resolution::Proceeded);
        assert!(elapsed >= Duration::from_millis(50));
    }

    #[test]
    fn settle_fires_once_and_closes_the_window() {
        let stage = Stage::new();
        let pending = Pending::new();
        let token = stage.activate(pending.finish_hook());
        let Pending { slot, mut rx } = pending;
        let res = stage.scope(token);
        let settle = Settle { scope: res.clone(), slot };

        assert!(settle.fire(Signal::Proceed));
        assert!(!settle.fire(Signal::Failed("second".to_owned())));
        assert!(!settle.expire());
        assert!(!res.is_active());
        assert_eq!(rx.try_recv().unwrap(), Signal::Proceed);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_after_proceeding_are_dropped() {
        let stage = Stage::new();
        let pending = Pending::new();
        let token = stage.activate(pending.finish_hook());
        let step = Step::new("both", |_req, res: ScopedResponse, next: Next| async move {
            next.proceed();
            res.status(500).json(json!({ "late": true }));
        });

        let (resolution, _) = execute(
            step.handler(),
            Arc::new(Request::default()),
            stage.scope(token),
            pending,
            Duration::from_secs(2),
        )
        .await;
        assert_eq!(resolution, Resolution::Proceeded);

        let after = stage.retire(token, None);
        assert_eq!(after.status_code, 200);
        assert!(!after.responded);
    }
}
