//! Structured exception propagation.
//!
//! Try blocks form a stack on the runtime. Entering one snapshots the
//! local-scope depth; a throw stores the error object in the runtime's
//! single exception slot (releasing the previous occupant) and unwinds as
//! the `Exception` error variant. Before a handler runs, the scope stack is
//! collapsed back to the snapshot. A throw from inside the catch body raises
//! to the finally; the finally runs on every exit path; whatever is still
//! thrown after the finally propagates to the enclosing block. A handled
//! block clears the exception slot on exit.
//!
//! Infrastructure errors ride the same `Result` channel but never match a
//! script `catch`: they run the finally for cleanup and keep propagating.

use crate::console::ConsoleLevel;
use crate::error::{RtResult, RuntimeError};
use crate::heap::ObjRef;
use crate::object::{HeapObject, ObjData};
use crate::runtime::{Runtime, StdObject};
use crate::value::Value;

/// Lifecycle of one try block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryState {
    /// Executing the try body.
    Pending,
    /// An exception arrived and no handler has claimed it yet.
    Thrown,
    /// The catch body is (or has finished) handling the exception.
    Caught,
    /// A rethrow from inside the catch body; the finally still runs, then
    /// the exception leaves the block.
    RaiseToFinally,
}

#[derive(Debug)]
pub(crate) struct TryBlock {
    pub state: TryState,
    pub scope_depth: usize,
}

/// The error-class payload.
#[derive(Debug, Default)]
pub struct ErrorData {
    pub name: &'static str,
    pub message: Option<String>,
    pub filename: &'static str,
    pub line: u32,
    pub col: u32,
    pub cause: Option<ObjRef>,
}

impl ErrorData {
    /// Renders the canonical error line.
    pub fn render(&self) -> String {
        format!(
            "[{}] message:[{}] cause:[{}], filename:\"{}\":{}-{}",
            self.name,
            self.message.as_deref().unwrap_or("Unknown Error"),
            if self.cause.is_some() { "some" } else { "none" },
            self.filename,
            self.line,
            self.col
        )
    }
}

/// to-string hook of the error class.
pub(crate) fn error_to_string(rt: &mut Runtime, this: ObjRef, _args: &[Value]) -> RtResult<Value> {
    let text = match &rt.heap.get(this)?.data {
        ObjData::Error(e) => e.render(),
        _ => return Err(rt.payload_mismatch(this, "error")),
    };
    let s = rt.new_string(text)?;
    Ok(Value::Object(s))
}

impl Runtime {
    /// Builds an error object. `cause` is borrowed; the error retains it.
    pub fn new_error(
        &mut self,
        message: impl Into<String>,
        cause: Option<ObjRef>,
        filename: &'static str,
        line: u32,
        col: u32,
    ) -> RtResult<ObjRef> {
        if let Some(c) = cause {
            self.add_ref(c);
        }
        let venv = self.std_class(StdObject::ExceptionError)?;
        let size = venv.vtable.object_size;
        self.heap.alloc(
            size,
            HeapObject {
                venv,
                data: ObjData::Error(ErrorData {
                    name: "TS Error",
                    message: Some(message.into()),
                    filename,
                    line,
                    col,
                    cause,
                }),
            },
        )
    }

    /// Stores `err` as the in-flight exception (releasing the previous one)
    /// and returns the unwind signal. Ownership of `err` transfers to the
    /// exception slot. Typical use: `return Err(rt.throw(err));`
    pub fn throw(&mut self, err: ObjRef) -> RuntimeError {
        if let Some(old) = self.exception_value.replace(err) {
            self.heap.release(old);
        }
        RuntimeError::Exception
    }

    /// Builds and throws an error in one step.
    pub fn throw_error(
        &mut self,
        message: impl Into<String>,
        filename: &'static str,
        line: u32,
    ) -> RuntimeError {
        match self.new_error(message, None, filename, line, 0) {
            Ok(err) => self.throw(err),
            Err(e) => e,
        }
    }

    /// The in-flight exception object, if any. The slot keeps ownership.
    pub fn exception(&self) -> Option<ObjRef> {
        self.exception_value
    }

    /// Takes the in-flight exception out of the slot; the caller now owns
    /// the reference.
    pub fn take_exception(&mut self) -> Option<ObjRef> {
        self.exception_value.take()
    }

    /// Depth of the try-block stack.
    pub fn try_depth(&self) -> usize {
        self.try_blocks.len()
    }

    /// `try { body } catch (e) { handler }`.
    pub fn try_catch(
        &mut self,
        body: impl FnOnce(&mut Runtime) -> RtResult<()>,
        on_catch: impl FnOnce(&mut Runtime, ObjRef) -> RtResult<()>,
    ) -> RtResult<()> {
        self.run_protected(Some(body), Some(on_catch), None::<fn(&mut Runtime) -> RtResult<()>>)
    }

    /// `try { body } finally { cleanup }`.
    pub fn try_finally(
        &mut self,
        body: impl FnOnce(&mut Runtime) -> RtResult<()>,
        on_finally: impl FnOnce(&mut Runtime) -> RtResult<()>,
    ) -> RtResult<()> {
        self.run_protected(
            Some(body),
            None::<fn(&mut Runtime, ObjRef) -> RtResult<()>>,
            Some(on_finally),
        )
    }

    /// `try { body } catch (e) { handler } finally { cleanup }`.
    pub fn try_catch_finally(
        &mut self,
        body: impl FnOnce(&mut Runtime) -> RtResult<()>,
        on_catch: impl FnOnce(&mut Runtime, ObjRef) -> RtResult<()>,
        on_finally: impl FnOnce(&mut Runtime) -> RtResult<()>,
    ) -> RtResult<()> {
        self.run_protected(Some(body), Some(on_catch), Some(on_finally))
    }

    fn run_protected<B, C, F>(
        &mut self,
        body: Option<B>,
        on_catch: Option<C>,
        on_finally: Option<F>,
    ) -> RtResult<()>
    where
        B: FnOnce(&mut Runtime) -> RtResult<()>,
        C: FnOnce(&mut Runtime, ObjRef) -> RtResult<()>,
        F: FnOnce(&mut Runtime) -> RtResult<()>,
    {
        let snapshot = self.heap.scope_depth();
        self.try_blocks.push(TryBlock {
            state: TryState::Pending,
            scope_depth: snapshot,
        });

        if let Some(body) = body {
            match body(self) {
                Ok(()) => {}
                Err(RuntimeError::Exception) => {
                    self.heap.truncate_scopes(snapshot);
                    self.set_try_state(TryState::Thrown);
                }
                Err(other) => return self.abandon_block(on_finally, other),
            }
        }

        if self.try_state() == TryState::Thrown {
            if let Some(on_catch) = on_catch {
                self.set_try_state(TryState::Caught);
                let exc = self.exception().ok_or(RuntimeError::NullObject {
                    operation: "catch handler exception",
                })?;
                match on_catch(self, exc) {
                    Ok(()) => {}
                    Err(RuntimeError::Exception) => {
                        // Rethrow out of the catch body: the finally still
                        // runs, then the new exception leaves the block.
                        self.heap.truncate_scopes(snapshot);
                        self.set_try_state(TryState::RaiseToFinally);
                    }
                    Err(other) => return self.abandon_block(on_finally, other),
                }
            }
        }

        if let Some(on_finally) = on_finally {
            match on_finally(self) {
                Ok(()) => {}
                Err(RuntimeError::Exception) => {
                    // A throw from the finally replaces whatever was in
                    // flight.
                    self.heap.truncate_scopes(snapshot);
                    self.set_try_state(TryState::Thrown);
                }
                Err(other) => return self.abandon_block(None::<F>, other),
            }
        }

        let block = self.try_blocks.pop().expect("try block stack underflow");
        self.heap.truncate_scopes(block.scope_depth);
        match block.state {
            TryState::Pending | TryState::Caught => {
                if let Some(handled) = self.take_exception() {
                    self.heap.release(handled);
                }
                Ok(())
            }
            TryState::Thrown | TryState::RaiseToFinally => Err(RuntimeError::Exception),
        }
    }

    /// Infrastructure-error exit: run the finally for cleanup, pop the
    /// block, keep propagating.
    fn abandon_block<F>(&mut self, on_finally: Option<F>, err: RuntimeError) -> RtResult<()>
    where
        F: FnOnce(&mut Runtime) -> RtResult<()>,
    {
        if let Some(on_finally) = on_finally {
            let _ = on_finally(self);
        }
        if let Some(block) = self.try_blocks.pop() {
            self.heap.truncate_scopes(block.scope_depth);
        }
        Err(err)
    }

    fn try_state(&self) -> TryState {
        self.try_blocks
            .last()
            .map(|b| b.state)
            .unwrap_or(TryState::Pending)
    }

    fn set_try_state(&mut self, state: TryState) {
        if let Some(block) = self.try_blocks.last_mut() {
            block.state = state;
        }
    }

    /// Top-level exception sink: formats the error on the console error
    /// stream and records the nonzero disposition for the embedder.
    pub(crate) fn report_root_exception(&mut self, err: ObjRef) {
        let line = self
            .to_display(Value::Object(err))
            .unwrap_or_else(|_| "unrenderable error".to_owned());
        log::error!("uncaught exception: {line}");
        self.console_write(ConsoleLevel::Error, &format!("Uncaught {line}"));
        self.root_exceptions += 1;
    }

    /// Routes a task-level error: an in-flight script exception goes to the
    /// root-exception sink, anything else is logged and recorded.
    pub(crate) fn handle_task_error(&mut self, err: RuntimeError) {
        if err.is_exception() {
            if let Some(exc) = self.take_exception() {
                self.report_root_exception(exc);
                self.heap.release(exc);
                return;
            }
        }
        log::error!("task failed: {err}");
        self.root_exceptions += 1;
    }

    /// Embedder entry point for an exception that escaped a synchronous
    /// call (module initialization, a direct dispatch): reports it through
    /// the root-exception sink and releases it.
    pub fn report_uncaught(&mut self, err: ObjRef) {
        self.report_root_exception(err);
        self.heap.release(err);
    }

    /// True once any top-level exception has been reported; embedders turn
    /// this into a nonzero exit code.
    pub fn had_root_exception(&self) -> bool {
        self.root_exceptions > 0
    }
}
