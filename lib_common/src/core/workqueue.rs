//! Deadline-ordered work scheduler.
//!
//! Pollers enqueue self-rescheduling [`Workunit`]s; the queue runs them on a
//! single task in due-time order. A unit enqueued with an earlier deadline
//! than the one currently being waited for preempts the wait.

use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::heap::HeapBy;

type Job = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// A single scheduled piece of work, consumed when it runs.
pub struct Workunit {
    due: Option<Instant>,
    name: String,
    job: Job,
}

impl Workunit {
    /// A unit built with `due: None` is accepted here but refused by
    /// [`WorkQueue::enqueue`]; see there.
    pub fn new<F, Fut>(name: impl Into<String>, due: Option<Instant>, job: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            due,
            name: name.into(),
            job: Box::new(move || job().boxed()),
        }
    }

    pub fn due(&self) -> Option<Instant> {
        self.due
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn by_due(a: &Workunit, b: &Workunit) -> Ordering {
    a.due.cmp(&b.due)
}

struct Shared {
    heap: Mutex<HeapBy<Workunit, fn(&Workunit, &Workunit) -> Ordering>>,
    wake: Notify,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct WorkQueue {
    shared: Arc<Shared>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                heap: Mutex::new(HeapBy::new(by_due as fn(&Workunit, &Workunit) -> Ordering)),
                wake: Notify::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Queue a unit and wake the loop. Units without a due time are dropped
    /// on purpose: callers build a unit first and decide afterwards whether
    /// this cycle schedules anything at all.
    pub fn enqueue(&self, unit: Workunit) {
        if unit.due.is_none() {
            log::debug!("discarding unscheduled workunit `{}`", unit.name);
            return;
        }
        self.shared
            .heap
            .lock()
            .expect("workqueue heap lock poisoned")
            .push(unit);
        self.shared.wake.notify_one();
    }

    pub fn size(&self) -> usize {
        self.shared
            .heap
            .lock()
            .expect("workqueue heap lock poisoned")
            .len()
    }

    /// Idempotent, callable from any task. Pending units are discarded; an
    /// in-flight job finishes before the loop exits.
    pub fn stop(&self) {
        self.shared.cancel.cancel();
    }

    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move { queue.run().await })
    }

    /// Run the scheduling loop until [`stop`](Self::stop). The earliest-due
    /// unit is always the next one executed, regardless of insertion order.
    pub async fn run(&self) {
        loop {
            if self.shared.cancel.is_cancelled() {
                return;
            }

            let next_due = {
                let heap = self
                    .shared
                    .heap
                    .lock()
                    .expect("workqueue heap lock poisoned");
                heap.peek().and_then(|unit| unit.due)
            };

            match next_due {
                None => {
                    tokio::select! {
                        _ = self.shared.cancel.cancelled() => return,
                        _ = self.shared.wake.notified() => {}
                    }
                }
                Some(due) if due > Instant::now() => {
                    // A wake here may be a false alarm from a later-deadline
                    // insertion; loop back and re-peek either way.
                    tokio::select! {
                        _ = self.shared.cancel.cancelled() => return,
                        _ = self.shared.wake.notified() => {}
                        _ = tokio::time::sleep_until(due) => {}
                    }
                }
                Some(_) => {
                    let unit = self
                        .shared
                        .heap
                        .lock()
                        .expect("workqueue heap lock poisoned")
                        .pop();
                    if let Some(unit) = unit {
                        let Workunit { name, job, .. } = unit;
                        log::debug!("running workunit `{name}`");
                        if let Err(e) = job().await {
                            log::error!("workunit `{name}` failed: {e:#}");
                        }
                    }
                }
            }
        }
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}
