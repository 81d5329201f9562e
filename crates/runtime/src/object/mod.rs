//! The uniform object model.
//!
//! Every heap object is a vtable-env binding plus a typed payload. The
//! payload is one sum type over the class families the runtime knows about
//! (plain field objects, boxed primitives, strings, closures, promises,
//! modules, the std singletons); user-defined classes all share the
//! field-array family and differ only through their vtables.
//!
//! Each payload publishes the object references it owns through
//! [`ObjData::owned_refs`]; that enumeration is both the destructor's child
//! release list and the collector's visit function.

pub mod closure;
pub mod interface;
pub mod primitive;
pub mod string;
pub mod union;
pub mod vtable;

use std::rc::Rc;

use crate::awaiter::AwaiterData;
use crate::exception::ErrorData;
use crate::heap::ObjRef;
use crate::module::ModuleData;
use crate::promise::PromiseData;
use crate::timer::TimerService;
use crate::value::Value;

use closure::ClosureData;
use string::StringData;
use vtable::{DataKind, VtableEnv};

/// The typed payload of a heap object.
#[derive(Debug)]
pub enum ObjData {
    /// A plain object: the field arrays of the class chain, parent fields
    /// first.
    Fields(Vec<Value>),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Boolean(bool),
    Float(f32),
    Double(f64),
    String(StringData),
    Closure(ClosureData),
    Awaiter(AwaiterData),
    Promise(PromiseData),
    Module(ModuleData),
    Timer(TimerService),
    Console,
    Error(ErrorData),
}

impl ObjData {
    /// Builds the empty payload a class declares for fresh instances.
    pub fn fresh(kind: DataKind) -> ObjData {
        match kind {
            DataKind::Fields(n) => ObjData::Fields(vec![Value::Undefined; n as usize]),
            DataKind::Int32 => ObjData::Int32(0),
            DataKind::UInt32 => ObjData::UInt32(0),
            DataKind::Int64 => ObjData::Int64(0),
            DataKind::UInt64 => ObjData::UInt64(0),
            DataKind::Boolean => ObjData::Boolean(false),
            DataKind::Float => ObjData::Float(0.0),
            DataKind::Double => ObjData::Double(0.0),
            DataKind::String => ObjData::String(StringData::empty()),
            DataKind::Closure { objects, values } => {
                ObjData::Closure(ClosureData::new(objects, values))
            }
            DataKind::Awaiter { objects, values } => {
                ObjData::Awaiter(AwaiterData::new(objects, values))
            }
            DataKind::Promise => ObjData::Promise(PromiseData::new()),
            DataKind::Module {
                imports,
                values,
                functions,
                classes,
                interfaces,
            } => ObjData::Module(ModuleData::new(imports, values, functions, classes, interfaces)),
            DataKind::Timer => ObjData::Timer(TimerService::new()),
            DataKind::Console => ObjData::Console,
            DataKind::Error => ObjData::Error(ErrorData::default()),
        }
    }

    /// Every object reference this payload owns. Releasing these is the
    /// destructor's job; visiting them is the collector's.
    pub fn owned_refs(&self) -> Vec<ObjRef> {
        let mut out = Vec::new();
        self.push_owned_refs(&mut out);
        out
    }

    fn push_owned_refs(&self, out: &mut Vec<ObjRef>) {
        match self {
            ObjData::Fields(fields) => {
                out.extend(fields.iter().filter_map(Value::as_object));
            }
            ObjData::String(_)
            | ObjData::Console
            | ObjData::Int32(_)
            | ObjData::UInt32(_)
            | ObjData::Int64(_)
            | ObjData::UInt64(_)
            | ObjData::Boolean(_)
            | ObjData::Float(_)
            | ObjData::Double(_) => {}
            ObjData::Closure(c) => c.push_owned_refs(out),
            ObjData::Awaiter(a) => a.push_owned_refs(out),
            ObjData::Promise(p) => p.push_owned_refs(out),
            ObjData::Module(m) => m.push_owned_refs(out),
            ObjData::Timer(t) => t.push_owned_refs(out),
            ObjData::Error(e) => {
                out.extend(e.cause);
            }
        }
    }
}

/// One heap object: its class binding and its payload.
#[derive(Debug)]
pub struct HeapObject {
    pub venv: Rc<VtableEnv>,
    pub data: ObjData,
}

impl HeapObject {
    /// Everything the collector must treat as reachable from this object:
    /// the payload's owned references plus the defining module (an object
    /// keeps its class's module alive for dispatch).
    pub fn gc_refs(&self) -> Vec<ObjRef> {
        let mut out = self.data.owned_refs();
        out.extend(self.venv.module());
        out
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::value::ValueKind;
    use vtable::{BaseType, Vtable};

    /// A minimal field object for table-level tests that never dispatch.
    pub(crate) fn plain_object() -> HeapObject {
        let vtable = Rc::new(Vtable {
            name: "plain",
            super_class: None,
            object_size: vtable::object_size_for_fields(0),
            base_type: BaseType::Object,
            return_kind: ValueKind::Void,
            data: DataKind::Fields(0),
            interfaces: Vec::new(),
            constructor: None,
            to_string: None,
            members: Vec::new(),
        });
        HeapObject {
            venv: Rc::new(VtableEnv::new(vtable, None, None)),
            data: ObjData::Fields(Vec::new()),
        }
    }
}
