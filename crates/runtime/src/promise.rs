//! The promise engine.
//!
//! A promise transitions pending → fulfilled | rejected at most once; the
//! terminal state is sticky. Settling stores the result value and schedules
//! an asynchronous drain of the resolve-entry list: continuations are never
//! invoked synchronously from `then` or from a resolver, even when the
//! promise is already settled. Within one drain, entries run in insertion
//! order and are freed afterwards.
//!
//! Resolver and rejecter are one-shot closures back-referencing their owner
//! promise. Resolving with another promise adopts it: the inner promise gets
//! a bare pass-through entry pointing at the outer one.
//!
//! Awaiter promises (async-function results) share this payload but carry
//! the awaiter function: every settle re-enters the async body, and the
//! promise swings back to pending until the body reports its end label.

use crate::error::{RtResult, RuntimeError};
use crate::heap::ObjRef;
use crate::object::ObjData;
use crate::runtime::{Runtime, StdObject};
use crate::value::{obj_arg, Value};

/// Promise lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

/// One continuation registered on a promise.
#[derive(Debug)]
pub struct ResolveEntry {
    pub on_fulfilled: Option<ObjRef>,
    pub on_rejected: Option<ObjRef>,
    pub on_finally: Option<ObjRef>,
    /// The downstream promise fed by this entry.
    pub then: Option<ObjRef>,
}

#[derive(Debug)]
pub struct PromiseData {
    pub state: PromiseState,
    pub result: Value,
    /// A drain task is queued on the backend.
    pub drain_scheduled: bool,
    pub entries: Vec<ResolveEntry>,
    /// The async-function body driven by this promise, if it is an awaiter
    /// promise.
    pub awaiter: Option<ObjRef>,
}

impl PromiseData {
    pub fn new() -> Self {
        PromiseData {
            state: PromiseState::Pending,
            result: Value::Undefined,
            drain_scheduled: false,
            entries: Vec::new(),
            awaiter: None,
        }
    }

    pub(crate) fn push_owned_refs(&self, out: &mut Vec<ObjRef>) {
        out.extend(self.result.as_object());
        out.extend(self.awaiter);
        for entry in &self.entries {
            out.extend(entry.on_fulfilled);
            out.extend(entry.on_rejected);
            out.extend(entry.on_finally);
            out.extend(entry.then);
        }
    }
}

impl Default for PromiseData {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------
// std promise class members

/// Promise constructor: optional executor called synchronously with a fresh
/// resolver/rejecter pair.
pub(crate) fn promise_constructor(
    rt: &mut Runtime,
    this: ObjRef,
    args: &[Value],
) -> RtResult<Value> {
    if let Some(executor) = obj_arg(args, 0) {
        rt.promise_run_executor(this, executor)?;
    }
    Ok(Value::Undefined)
}

/// Awaiter-promise constructor: the executor is the awaiter function; the
/// promise keeps it and re-invokes it on every settle.
pub(crate) fn awaiter_promise_constructor(
    rt: &mut Runtime,
    this: ObjRef,
    args: &[Value],
) -> RtResult<Value> {
    let executor = obj_arg(args, 0).ok_or(RuntimeError::NullObject {
        operation: "awaiter promise executor",
    })?;
    rt.add_ref(executor);
    rt.promise_mut(this)?.awaiter = Some(executor);
    rt.promise_run_executor(this, executor)?;
    Ok(Value::Undefined)
}

pub(crate) fn promise_then(rt: &mut Runtime, this: ObjRef, args: &[Value]) -> RtResult<Value> {
    let on_fulfilled = obj_arg(args, 0);
    let on_rejected = obj_arg(args, 1);
    rt.promise_register(this, on_fulfilled, on_rejected, None, None, true)
}

pub(crate) fn promise_catch(rt: &mut Runtime, this: ObjRef, args: &[Value]) -> RtResult<Value> {
    let on_rejected = obj_arg(args, 0);
    rt.promise_register(this, None, on_rejected, None, None, true)
}

pub(crate) fn promise_finally(rt: &mut Runtime, this: ObjRef, args: &[Value]) -> RtResult<Value> {
    let on_finally = obj_arg(args, 0);
    rt.promise_register(this, None, None, on_finally, None, false)
}

pub(crate) fn promise_then_promise(
    rt: &mut Runtime,
    this: ObjRef,
    args: &[Value],
) -> RtResult<Value> {
    let then = obj_arg(args, 0);
    rt.promise_register(this, None, None, None, then, false)
}

/// Shared resolver/rejecter body: settle the owner once, then schedule.
pub(crate) fn resolver_rejecter_impl(
    rt: &mut Runtime,
    this: ObjRef,
    args: &[Value],
) -> RtResult<Value> {
    let owner = rt
        .closure_object(this, 0)?
        .ok_or(RuntimeError::NullObject {
            operation: "resolver owner promise",
        })?;
    let fulfil = rt.is_std_instance(this, StdObject::PromiseResolver)?;
    let result = args.first().copied().unwrap_or(Value::Undefined);

    {
        let promise = rt.promise_mut(owner)?;
        if promise.state != PromiseState::Pending {
            // Sticky: later invocations of either closure are no-ops.
            return Ok(Value::Undefined);
        }
    }
    rt.promise_settle(
        owner,
        if fulfil {
            PromiseState::Fulfilled
        } else {
            PromiseState::Rejected
        },
        result,
        true,
    )?;
    Ok(Value::Undefined)
}

/// Resolver/rejecter constructor: capture the owner promise.
pub(crate) fn resolver_rejecter_constructor(
    rt: &mut Runtime,
    this: ObjRef,
    args: &[Value],
) -> RtResult<Value> {
    if let Some(owner) = obj_arg(args, 0) {
        rt.add_ref(owner);
        rt.set_closure_object(this, 0, Some(owner))?;
    }
    Ok(Value::Undefined)
}

impl Runtime {
    pub(crate) fn promise_mut(&mut self, obj: ObjRef) -> RtResult<&mut PromiseData> {
        let err = self.payload_mismatch(obj, "promise");
        match &mut self.heap.get_mut(obj)?.data {
            ObjData::Promise(p) => Ok(p),
            _ => Err(err),
        }
    }

    fn promise_ref(&self, obj: ObjRef) -> RtResult<&PromiseData> {
        match &self.heap.get(obj)?.data {
            ObjData::Promise(p) => Ok(p),
            _ => Err(self.payload_mismatch(obj, "promise")),
        }
    }

    /// True if `obj` is a promise (plain or awaiter).
    pub fn is_promise(&self, obj: ObjRef) -> bool {
        self.promise_ref(obj).is_ok()
    }

    /// Current state, for tests and diagnostics.
    pub fn promise_state(&self, obj: ObjRef) -> RtResult<PromiseState> {
        Ok(self.promise_ref(obj)?.state)
    }

    /// Creates a promise; a provided executor runs synchronously with the
    /// resolver/rejecter pair.
    pub fn new_promise(&mut self, executor: Option<ObjRef>) -> RtResult<ObjRef> {
        let venv = self.std_class(StdObject::Promise)?;
        let args = match executor {
            Some(f) => vec![Value::Object(f)],
            None => Vec::new(),
        };
        self.new_object(&venv, &args)
    }

    /// `promise.then(onFulfilled, onRejected)`, returning the downstream
    /// promise.
    pub fn promise_then(
        &mut self,
        promise: ObjRef,
        on_fulfilled: Option<ObjRef>,
        on_rejected: Option<ObjRef>,
    ) -> RtResult<ObjRef> {
        let ret =
            self.promise_register(promise, on_fulfilled, on_rejected, None, None, true)?;
        ret.as_object().ok_or(RuntimeError::NullObject {
            operation: "promise_then downstream",
        })
    }

    /// `promise.catch(onRejected)`, returning the downstream promise.
    pub fn promise_catch(&mut self, promise: ObjRef, on_rejected: ObjRef) -> RtResult<ObjRef> {
        self.promise_then(promise, None, Some(on_rejected))
    }

    /// `promise.finally(onFinally)`, a side-effect leaf with no downstream.
    pub fn promise_finally(&mut self, promise: ObjRef, on_finally: ObjRef) -> RtResult<()> {
        self.promise_register(promise, None, None, Some(on_finally), None, false)
            .map(|_| ())
    }

    /// Wires `downstream` to settle when `promise` settles (adoption).
    pub fn promise_adopt(&mut self, promise: ObjRef, downstream: ObjRef) -> RtResult<()> {
        self.promise_register(promise, None, None, None, Some(downstream), false)
            .map(|_| ())
    }

    fn promise_run_executor(&mut self, promise: ObjRef, executor: ObjRef) -> RtResult<()> {
        let resolver_env = self.std_class(StdObject::PromiseResolver)?;
        let rejecter_env = self.std_class(StdObject::PromiseRejecter)?;
        let resolver = self.new_object(&resolver_env, &[Value::Object(promise)])?;
        let rejecter = self.new_object(&rejecter_env, &[Value::Object(promise)])?;
        let outcome =
            self.function_call(executor, &[Value::Object(resolver), Value::Object(rejecter)]);
        self.release(resolver);
        self.release(rejecter);
        outcome.map(|_| ())
    }

    /// Appends a resolve entry and schedules a drain if already settled.
    /// Stored callbacks and the downstream promise are retained by the
    /// entry; a created downstream is returned owned by the caller.
    fn promise_register(
        &mut self,
        promise: ObjRef,
        on_fulfilled: Option<ObjRef>,
        on_rejected: Option<ObjRef>,
        on_finally: Option<ObjRef>,
        then: Option<ObjRef>,
        make_downstream: bool,
    ) -> RtResult<Value> {
        let downstream = match (make_downstream, then) {
            (true, _) => Some(self.new_promise(None)?),
            (false, t) => t,
        };
        if on_fulfilled.is_none()
            && on_rejected.is_none()
            && on_finally.is_none()
            && downstream.is_none()
        {
            return Ok(Value::Undefined);
        }

        for obj in [on_fulfilled, on_rejected, on_finally, downstream]
            .into_iter()
            .flatten()
        {
            self.add_ref(obj);
        }
        self.promise_mut(promise)?.entries.push(ResolveEntry {
            on_fulfilled,
            on_rejected,
            on_finally,
            then: downstream,
        });
        self.promise_schedule_drain(promise)?;

        Ok(match (make_downstream, downstream) {
            (true, Some(d)) => Value::Object(d),
            _ => Value::Undefined,
        })
    }

    /// Moves `promise` into a settled state with `result` and schedules its
    /// drain. With `retain_result`, an object result gains a reference owned
    /// by the promise (callers passing borrowed values); otherwise ownership
    /// of `result` transfers in.
    pub(crate) fn promise_settle(
        &mut self,
        promise: ObjRef,
        state: PromiseState,
        result: Value,
        retain_result: bool,
    ) -> RtResult<()> {
        debug_assert!(state != PromiseState::Pending);
        if retain_result {
            if let Some(obj) = result.as_object() {
                self.add_ref(obj);
            }
        }
        if self.promise_ref(promise)?.state != PromiseState::Pending {
            // Sticky terminal state; drop the incoming value.
            if let Some(obj) = result.as_object() {
                self.release(obj);
            }
            return Ok(());
        }
        self.promise_force_state(promise, state, result)?;
        self.promise_schedule_drain(promise)
    }

    /// Unconditionally installs a state and result, releasing the previous
    /// result. Used by the drain itself (awaiter rejection), where the
    /// promise is already settled.
    fn promise_force_state(
        &mut self,
        promise: ObjRef,
        state: PromiseState,
        result: Value,
    ) -> RtResult<()> {
        let old = {
            let data = self.promise_mut(promise)?;
            data.state = state;
            std::mem::replace(&mut data.result, result)
        };
        if let Some(obj) = old.as_object() {
            self.release(obj);
        }
        Ok(())
    }

    /// Queues the asynchronous drain once per settlement. The promise is
    /// pinned (reference + collector root) for the lifetime of the task.
    pub(crate) fn promise_schedule_drain(&mut self, promise: ObjRef) -> RtResult<()> {
        {
            let data = self.promise_mut(promise)?;
            if data.state == PromiseState::Pending || data.drain_scheduled {
                return Ok(());
            }
            data.drain_scheduled = true;
        }
        self.add_ref(promise);
        self.drain_pins.insert(promise);
        self.backend
            .post_task(crate::eventloop::Task::new(move |rt| rt.promise_drain(promise)), 0);
        Ok(())
    }

    /// The scheduled drain: walk the resolve entries in order, free them,
    /// then drop the pin.
    fn promise_drain(&mut self, promise: ObjRef) -> RtResult<()> {
        self.drain_pins.remove(&promise);

        let (mut state, mut result, awaiter) = {
            let data = self.promise_mut(promise)?;
            data.drain_scheduled = false;
            (data.state, data.result, data.awaiter)
        };
        log::trace!("promise drain: {:?} ({:?})", promise.raw(), state);

        // An awaiter promise re-enters the async body on every settle; it
        // only releases its continuations once the body reports the end.
        let mut awaiter_running = false;
        if let Some(body) = awaiter {
            if let Err(err) = self.function_call(body, &[result]) {
                if err.is_exception() {
                    let exc = self.take_exception();
                    let value = exc.map(Value::Object).unwrap_or(Value::Undefined);
                    self.promise_force_state(promise, PromiseState::Rejected, value)?;
                    self.awaiter_finish(body)?;
                } else {
                    return Err(err);
                }
            }
            let finished = self.awaiter_label(body)?.is_none();
            if finished {
                self.promise_mut(promise)?.awaiter = None;
                self.release(body);
            } else {
                self.promise_mut(promise)?.state = PromiseState::Pending;
                awaiter_running = true;
            }
            let data = self.promise_mut(promise)?;
            state = data.state;
            result = data.result;
        }

        if awaiter_running || state == PromiseState::Pending {
            self.release(promise);
            return Ok(());
        }

        let entries = std::mem::take(&mut self.promise_mut(promise)?.entries);
        for entry in &entries {
            self.promise_process_entry(state, result, entry)?;
        }
        // Free the entries: drop every reference they retained.
        for entry in entries {
            for obj in [entry.on_fulfilled, entry.on_rejected, entry.on_finally, entry.then]
                .into_iter()
                .flatten()
            {
                self.release(obj);
            }
        }
        self.release(promise);
        Ok(())
    }

    /// Runs one resolve entry against a settled promise's state and result.
    fn promise_process_entry(
        &mut self,
        state: PromiseState,
        result: Value,
        entry: &ResolveEntry,
    ) -> RtResult<()> {
        // A finally entry runs on any settlement, with no arguments and no
        // downstream propagation.
        if let Some(on_finally) = entry.on_finally {
            self.function_call(on_finally, &[])?;
            return Ok(());
        }

        let callback = match state {
            PromiseState::Fulfilled => entry.on_fulfilled,
            PromiseState::Rejected => entry.on_rejected,
            PromiseState::Pending => None,
        };

        match (callback, entry.then) {
            (Some(callback), downstream) => {
                match self.function_call(callback, &[result]) {
                    Ok(ret) => {
                        if let Some(downstream) = downstream {
                            match ret.as_object().filter(|&o| self.is_promise(o)) {
                                Some(inner) => {
                                    // Chain: the returned promise feeds the
                                    // downstream when it settles.
                                    self.promise_adopt(inner, downstream)?;
                                    self.release(inner);
                                }
                                None => {
                                    self.promise_settle(downstream, state, ret, false)?;
                                }
                            }
                        } else if let Some(obj) = ret.as_object() {
                            // Nothing consumes the return value.
                            self.release(obj);
                        }
                    }
                    Err(err) if err.is_exception() => {
                        // A throwing callback rejects its downstream.
                        let exc = self.take_exception();
                        let value = exc.map(Value::Object).unwrap_or(Value::Undefined);
                        match downstream {
                            Some(downstream) => {
                                self.promise_settle(
                                    downstream,
                                    PromiseState::Rejected,
                                    value,
                                    false,
                                )?;
                            }
                            None => {
                                if let Some(obj) = value.as_object() {
                                    self.report_root_exception(obj);
                                    self.release(obj);
                                }
                            }
                        }
                    }
                    Err(err) => return Err(err),
                }
            }
            (None, Some(downstream)) => {
                // Pass-through: the downstream inherits state and value.
                self.promise_settle(downstream, state, result, true)?;
            }
            (None, None) => {}
        }
        Ok(())
    }
}
