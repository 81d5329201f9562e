//! Async-function awaiter frames.
//!
//! An async function compiles into a single body function with one resume
//! label per `await` site. Its suspended state (the next label, the
//! function's own promise, captured object slots, and plain locals) lives
//! in an awaiter frame carried inline by the awaiter function object.
//!
//! First call (receiver is the plain function class): build the frame and
//! the awaiter function, wrap it in an awaiter promise, return that promise.
//! The awaiter promise calls the body as its executor; at that first entry
//! the body stores its own promise (recovered from the resolver argument)
//! and runs to the first `await`. Each `await` links the awaited promise to
//! the awaiter's promise and parks the continuation label; when the awaited
//! promise settles, the pass-through wakes the awaiter promise, whose drain
//! re-enters the body at the parked label. The end of the body clears the
//! label, which tells the promise to drop the awaiter function and stay
//! settled.

use crate::error::{RtResult, RuntimeError};
use crate::heap::ObjRef;
use crate::object::vtable::BaseType;
use crate::object::ObjData;
use crate::runtime::{Runtime, StdObject};
use crate::value::Value;

/// The suspended state of one async-function activation.
#[derive(Debug)]
pub struct AwaiterData {
    /// Resume label, None once the body has run to completion.
    pub next_label: Option<u32>,
    /// The async function's own promise.
    pub promise: Option<ObjRef>,
    /// Captured object slots, owned by the frame.
    pub objects: Vec<Option<ObjRef>>,
    /// Plain locals.
    pub values: Vec<Value>,
}

impl AwaiterData {
    pub fn new(objects: u32, values: u32) -> Self {
        AwaiterData {
            next_label: None,
            promise: None,
            objects: vec![None; objects as usize],
            values: vec![Value::Undefined; values as usize],
        }
    }

    pub(crate) fn push_owned_refs(&self, out: &mut Vec<ObjRef>) {
        out.extend(self.promise);
        out.extend(self.objects.iter().flatten().copied());
        out.extend(self.values.iter().filter_map(Value::as_object));
    }
}

impl Runtime {
    /// True if `obj` is an awaiter function (a resumed async body call).
    pub fn is_awaiter_function(&self, obj: ObjRef) -> bool {
        self.heap
            .get(obj)
            .map(|o| o.venv.vtable.base_type == BaseType::FunctionAwaiter)
            .unwrap_or(false)
    }

    fn awaiter_mut(&mut self, func: ObjRef) -> RtResult<&mut AwaiterData> {
        let err = self.payload_mismatch(func, "awaiter");
        match &mut self.heap.get_mut(func)?.data {
            ObjData::Awaiter(a) => Ok(a),
            _ => Err(err),
        }
    }

    fn awaiter_ref(&self, func: ObjRef) -> RtResult<&AwaiterData> {
        match &self.heap.get(func)?.data {
            ObjData::Awaiter(a) => Ok(a),
            _ => Err(self.payload_mismatch(func, "awaiter")),
        }
    }

    /// Creates the awaiter function for an async body. The class must
    /// declare an awaiter payload and the awaiter base type.
    pub fn new_awaiter_function(
        &mut self,
        venv: &std::rc::Rc<crate::object::vtable::VtableEnv>,
    ) -> RtResult<ObjRef> {
        debug_assert_eq!(venv.vtable.base_type, BaseType::FunctionAwaiter);
        self.new_object(venv, &[])
    }

    /// Wraps an awaiter function in its driving promise. The promise owns
    /// one reference to the function and re-invokes it on every settle.
    pub fn new_awaiter_promise(&mut self, awaiter_func: ObjRef) -> RtResult<ObjRef> {
        let venv = self.std_class(StdObject::PromiseAwaiter)?;
        self.new_object(&venv, &[Value::Object(awaiter_func)])
    }

    /// The frame's parked resume label.
    pub fn awaiter_label(&self, func: ObjRef) -> RtResult<Option<u32>> {
        Ok(self.awaiter_ref(func)?.next_label)
    }

    /// Parks the continuation label for the next resume.
    pub fn awaiter_set_label(&mut self, func: ObjRef, label: u32) -> RtResult<()> {
        self.awaiter_mut(func)?.next_label = Some(label);
        Ok(())
    }

    /// Marks the body as complete; the driving promise drops the function
    /// when it observes this.
    pub fn awaiter_finish(&mut self, func: ObjRef) -> RtResult<()> {
        self.awaiter_mut(func)?.next_label = None;
        Ok(())
    }

    /// First-entry bootstrap: recover and store the async function's own
    /// promise from the executor's resolver argument.
    pub fn awaiter_bind_promise(&mut self, func: ObjRef, resolver_arg: Value) -> RtResult<()> {
        let resolver = resolver_arg
            .as_object()
            .ok_or(RuntimeError::NullObject {
                operation: "awaiter_bind_promise",
            })?;
        let promise = self
            .promise_of_resolver(resolver)?
            .ok_or(RuntimeError::NullObject {
                operation: "awaiter resolver owner",
            })?;
        self.add_ref(promise);
        let old = {
            let frame = self.awaiter_mut(func)?;
            std::mem::replace(&mut frame.promise, Some(promise))
        };
        if let Some(old) = old {
            self.release(old);
        }
        Ok(())
    }

    /// One `await` site: link the awaited promise into this frame's own
    /// promise and park the continuation label.
    pub fn awaiter_await(
        &mut self,
        func: ObjRef,
        awaited: ObjRef,
        next_label: u32,
    ) -> RtResult<()> {
        let own = self
            .awaiter_ref(func)?
            .promise
            .ok_or(RuntimeError::NullObject {
                operation: "awaiter own promise",
            })?;
        self.promise_adopt(awaited, own)?;
        self.awaiter_set_label(func, next_label)
    }

    /// Reads a plain local from the frame.
    pub fn awaiter_value(&self, func: ObjRef, index: usize) -> RtResult<Value> {
        Ok(self
            .awaiter_ref(func)?
            .values
            .get(index)
            .copied()
            .unwrap_or(Value::Undefined))
    }

    /// Writes a plain local in the frame.
    pub fn set_awaiter_value(&mut self, func: ObjRef, index: usize, value: Value) -> RtResult<()> {
        self.awaiter_mut(func)?.values[index] = value;
        Ok(())
    }

    /// Reads a captured object slot from the frame.
    pub fn awaiter_object(&self, func: ObjRef, index: usize) -> RtResult<Option<ObjRef>> {
        Ok(self.awaiter_ref(func)?.objects.get(index).copied().flatten())
    }

    /// Installs a captured object slot; ownership transfers to the frame.
    pub fn set_awaiter_object(
        &mut self,
        func: ObjRef,
        index: usize,
        obj: Option<ObjRef>,
    ) -> RtResult<()> {
        let old = {
            let frame = self.awaiter_mut(func)?;
            std::mem::replace(&mut frame.objects[index], obj)
        };
        if let Some(old) = old {
            self.release(old);
        }
        Ok(())
    }

    /// The owner promise behind a resolver or rejecter closure, or None for
    /// any other object.
    pub fn promise_of_resolver(&self, obj: ObjRef) -> RtResult<Option<ObjRef>> {
        let is_resolver = self.is_std_instance(obj, StdObject::PromiseResolver)?
            || self.is_std_instance(obj, StdObject::PromiseRejecter)?;
        if !is_resolver {
            return Ok(None);
        }
        self.closure_object(obj, 0)
    }
}
