//! Function objects and closures.
//!
//! A function is an object whose first user member is the call body; its
//! payload is the captured state, split into owned object slots and plain
//! value locals. The capture layout is declared by the function's vtable
//! (`DataKind::Closure`), so creation sites fill slots by index the same way
//! the compiled code declared them.

use crate::error::RtResult;
use crate::heap::ObjRef;
use crate::object::vtable::{VtableEnv, METHOD_LAST};
use crate::object::ObjData;
use crate::runtime::Runtime;
use crate::value::Value;

use std::rc::Rc;

#[derive(Debug)]
pub struct ClosureData {
    /// Captured object references, owned by the closure.
    pub objects: Vec<Option<ObjRef>>,
    /// Captured plain locals.
    pub values: Vec<Value>,
}

impl ClosureData {
    pub fn new(objects: u32, values: u32) -> Self {
        ClosureData {
            objects: vec![None; objects as usize],
            values: vec![Value::Undefined; values as usize],
        }
    }

    pub(crate) fn push_owned_refs(&self, out: &mut Vec<ObjRef>) {
        out.extend(self.objects.iter().flatten().copied());
        out.extend(self.values.iter().filter_map(Value::as_object));
    }
}

impl Runtime {
    /// Creates a function object with no captured state.
    pub fn new_function(&mut self, venv: &Rc<VtableEnv>) -> RtResult<ObjRef> {
        self.new_object(venv, &[])
    }

    /// Creates a function object and installs its captured state. Ownership
    /// of the object captures transfers to the closure.
    pub fn new_closure(
        &mut self,
        venv: &Rc<VtableEnv>,
        objects: Vec<Option<ObjRef>>,
        values: Vec<Value>,
    ) -> RtResult<ObjRef> {
        let func = self.new_object(venv, &[])?;
        let err = self.payload_mismatch(func, "closure");
        match &mut self.heap.get_mut(func)?.data {
            ObjData::Closure(c) => {
                debug_assert_eq!(c.objects.len(), objects.len());
                debug_assert_eq!(c.values.len(), values.len());
                c.objects = objects;
                c.values = values;
                Ok(func)
            }
            _ => Err(err),
        }
    }

    /// Invokes a function object's call member.
    pub fn function_call(&mut self, func: ObjRef, args: &[Value]) -> RtResult<Value> {
        self.method_call(func, METHOD_LAST, args)
    }

    /// Reads a captured object slot.
    pub fn closure_object(&self, func: ObjRef, index: usize) -> RtResult<Option<ObjRef>> {
        match &self.heap.get(func)?.data {
            ObjData::Closure(c) => Ok(c.objects.get(index).copied().flatten()),
            _ => Err(self.payload_mismatch(func, "closure")),
        }
    }

    /// Installs a captured object slot, releasing any previous occupant.
    /// Ownership of `obj` transfers to the closure.
    pub fn set_closure_object(
        &mut self,
        func: ObjRef,
        index: usize,
        obj: Option<ObjRef>,
    ) -> RtResult<()> {
        let err = self.payload_mismatch(func, "closure");
        let old = match &mut self.heap.get_mut(func)?.data {
            ObjData::Closure(c) => {
                let old = c.objects[index];
                c.objects[index] = obj;
                old
            }
            _ => return Err(err),
        };
        if let Some(o) = old {
            self.heap.release(o);
        }
        Ok(())
    }

    /// Reads a captured plain local.
    pub fn closure_value(&self, func: ObjRef, index: usize) -> RtResult<Value> {
        match &self.heap.get(func)?.data {
            ObjData::Closure(c) => Ok(c.values.get(index).copied().unwrap_or(Value::Undefined)),
            _ => Err(self.payload_mismatch(func, "closure")),
        }
    }

    /// Writes a captured plain local.
    pub fn set_closure_value(&mut self, func: ObjRef, index: usize, value: Value) -> RtResult<()> {
        let err = self.payload_mismatch(func, "closure");
        match &mut self.heap.get_mut(func)?.data {
            ObjData::Closure(c) => {
                c.values[index] = value;
                Ok(())
            }
            _ => Err(err),
        }
    }

    /// Declared return kind of a function object.
    pub fn function_return_kind(&self, func: ObjRef) -> RtResult<crate::value::ValueKind> {
        Ok(self.heap.get(func)?.venv.vtable.return_kind)
    }
}
