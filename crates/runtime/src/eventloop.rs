//! The event-loop backend interface and the in-process backend.
//!
//! The runtime does not own a loop. It consumes three embedder-supplied
//! operations (a monotonic clock, a timer-deadline request, and a task
//! post) and exposes `Runtime::on_timeout` for the backend to call when a
//! deadline elapses. Tasks are one-shot callbacks into the runtime; the
//! timer service and the promise engine are their only producers.
//!
//! [`LocalBackend`] is the in-process implementation: a shared queue with a
//! virtual monotonic clock. Its pump delivers timeouts and due tasks in
//! timestamp order and advances the clock to the next event when idle, which
//! makes delay-sensitive scenarios deterministic under test.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::RtResult;
use crate::runtime::Runtime;

/// A one-shot callback posted onto the loop.
pub struct Task(Box<dyn FnOnce(&mut Runtime) -> RtResult<()>>);

impl Task {
    pub fn new(f: impl FnOnce(&mut Runtime) -> RtResult<()> + 'static) -> Self {
        Task(Box::new(f))
    }

    pub fn run(self, rt: &mut Runtime) -> RtResult<()> {
        (self.0)(rt)
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Task")
    }
}

/// The operations an embedder's loop supplies to the runtime.
pub trait EventLoopBackend {
    /// Monotonic milliseconds.
    fn now_ms(&self) -> u64;

    /// Requests a wake-up at or after `deadline_ms`. Implementations keep
    /// the earliest requested deadline; delivering it consumes it.
    fn set_next_deadline(&mut self, deadline_ms: u64);

    /// Enqueues `task` to run after `delay_ms`.
    fn post_task(&mut self, task: Task, delay_ms: u64);
}

#[derive(Default)]
struct LoopState {
    clock_ms: u64,
    next_seq: u64,
    tasks: BTreeMap<(u64, u64), Task>,
    deadline: Option<u64>,
}

impl LoopState {
    fn earliest(&self) -> Option<(u64, bool)> {
        let task_due = self.tasks.keys().next().map(|&(due, _)| due);
        match (self.deadline, task_due) {
            (None, None) => None,
            (Some(d), None) => Some((d, true)),
            (None, Some(t)) => Some((t, false)),
            // A deadline ties ahead of a task at the same instant.
            (Some(d), Some(t)) => {
                if d <= t {
                    Some((d, true))
                } else {
                    Some((t, false))
                }
            }
        }
    }
}

enum Wake {
    Timeout(u64),
    Run(Task),
    Idle,
}

/// The in-process backend: a shared task queue over a virtual clock.
///
/// Clones share one queue; the runtime holds one clone as its backend while
/// the embedder pumps another.
#[derive(Clone, Default)]
pub struct LocalBackend {
    state: Rc<RefCell<LoopState>>,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pumps until no task is queued and no timer deadline is pending.
    /// Returns true when the loop drained to empty.
    pub fn run(&self, rt: &mut Runtime) -> bool {
        loop {
            let wake = {
                let mut state = self.state.borrow_mut();
                match state.earliest() {
                    None => Wake::Idle,
                    Some((at, is_deadline)) => {
                        if at > state.clock_ms {
                            state.clock_ms = at;
                        }
                        if is_deadline {
                            state.deadline = None;
                            Wake::Timeout(state.clock_ms)
                        } else {
                            let key = *state.tasks.keys().next().expect("task queue head");
                            let task = state.tasks.remove(&key).expect("task queue head");
                            Wake::Run(task)
                        }
                    }
                }
            };
            match wake {
                Wake::Idle => return true,
                Wake::Timeout(now) => rt.on_timeout(now),
                Wake::Run(task) => {
                    if let Err(err) = task.run(rt) {
                        rt.handle_task_error(err);
                    }
                }
            }
        }
    }

    /// The backend's current (virtual) time.
    pub fn clock_ms(&self) -> u64 {
        self.state.borrow().clock_ms
    }
}

impl EventLoopBackend for LocalBackend {
    fn now_ms(&self) -> u64 {
        self.state.borrow().clock_ms
    }

    fn set_next_deadline(&mut self, deadline_ms: u64) {
        let mut state = self.state.borrow_mut();
        state.deadline = Some(match state.deadline {
            Some(current) => current.min(deadline_ms),
            None => deadline_ms,
        });
    }

    fn post_task(&mut self, task: Task, delay_ms: u64) {
        let mut state = self.state.borrow_mut();
        let due = state.clock_ms + delay_ms;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.tasks.insert((due, seq), task);
    }
}
