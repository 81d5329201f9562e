//! Vtables, vtable environments, and interface metadata.
//!
//! A vtable is per-class metadata: name, super class, declared object size
//! (which drives size-class selection), base-type tag, lifecycle hooks, the
//! implemented-interface entries, the payload layout, and the ordered member
//! table. A member slot is either a field index or a method pointer; which
//! one is fixed by the class declaration and known to callers through the
//! compile-time member index.
//!
//! Member indices 0..3 are reserved for the lifecycle slots (constructor,
//! destroy, to_string, gc_visit); user members are addressed from
//! [`METHOD_LAST`] upward. The destroy and gc_visit slots have no function
//! pointers here: the typed payload's `Drop` and its published child visitor
//! cover them.

use std::cell::Cell;
use std::rc::Rc;

use crate::error::{RtResult, RuntimeError};
use crate::heap::{ObjRef, SLOT_HEADER_BYTES};
use crate::runtime::Runtime;
use crate::value::{Value, ValueKind};

/// Reserved member index of the constructor.
pub const METHOD_CONSTRUCTOR: u32 = 0;
/// Reserved member index of the destructor slot.
pub const METHOD_DESTROY: u32 = 1;
/// Reserved member index of the to-string hook.
pub const METHOD_TO_STRING: u32 = 2;
/// Reserved member index of the gc-visit slot.
pub const METHOD_GC_VISIT: u32 = 3;
/// First user member index.
pub const METHOD_LAST: u32 = 4;

/// Bytes of one stored field value, for declared-size computation.
pub const FIELD_BYTES: u32 = 16;
/// Bytes of the object header (the vtable-env binding).
pub const OBJECT_HEADER_BYTES: u32 = 8;

/// A native method implementation. `self` arrives as the receiver handle;
/// arguments are borrowed; the returned value is owned by the caller.
pub type NativeFn = fn(&mut Runtime, ObjRef, &[Value]) -> RtResult<Value>;

/// One entry in a vtable's member table.
#[derive(Clone, Copy)]
pub enum Member {
    /// A field, addressed by its index in the object's field array.
    Field(u32),
    /// A method.
    Method(NativeFn),
}

impl std::fmt::Debug for Member {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Member::Field(i) => write!(f, "Member::Field({i})"),
            Member::Method(_) => write!(f, "Member::Method(..)"),
        }
    }
}

/// The base-type tag every vtable carries, used by the generic conversion
/// utilities to interpret an object without dispatching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseType {
    Int32,
    UInt32,
    Int64,
    UInt64,
    Boolean,
    Float,
    Double,
    String,
    BigInt,
    Array,
    Map,
    Set,
    Function,
    FunctionAwaiter,
    Module,
    Object,
}

/// The payload layout a class declares for its instances. Construction
/// builds the empty payload from this; closure and awaiter layouts declare
/// their captured-slot counts here the way the original declared closure
/// byte sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    /// A plain object with `n` value fields (super-class fields included).
    Fields(u32),
    Int32,
    UInt32,
    Int64,
    UInt64,
    Boolean,
    Float,
    Double,
    String,
    /// A function object capturing `objects` owned references and `values`
    /// plain locals.
    Closure { objects: u32, values: u32 },
    /// An async-function frame: label + owned promise + captures.
    Awaiter { objects: u32, values: u32 },
    Promise,
    Module {
        imports: u32,
        values: u32,
        functions: u32,
        classes: u32,
        interfaces: u32,
    },
    Timer,
    Console,
    Error,
}

/// Interface metadata: name and member count (plus how many super
/// interfaces the declaration folded in).
#[derive(Debug)]
pub struct InterfaceMeta {
    pub name: &'static str,
    pub member_count: u32,
    pub super_count: u32,
}

/// One implemented interface in a vtable: which metadata it satisfies and
/// where the interface's members start in this class's member table.
#[derive(Debug, Clone)]
pub struct InterfaceEntry {
    pub meta: Rc<InterfaceMeta>,
    pub member_start: u32,
}

/// Per-class metadata.
pub struct Vtable {
    pub name: &'static str,
    pub super_class: Option<Rc<Vtable>>,
    /// Declared instance size in bytes, header included; selects the size
    /// class at allocation time.
    pub object_size: u32,
    pub base_type: BaseType,
    /// Declared return kind of the call member, for function classes.
    pub return_kind: ValueKind,
    pub data: DataKind,
    pub interfaces: Vec<InterfaceEntry>,
    pub constructor: Option<NativeFn>,
    pub to_string: Option<NativeFn>,
    /// User members, addressed from [`METHOD_LAST`].
    pub members: Vec<Member>,
}

impl std::fmt::Debug for Vtable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vtable")
            .field("name", &self.name)
            .field("object_size", &self.object_size)
            .field("base_type", &self.base_type)
            .field("members", &self.members.len())
            .finish()
    }
}

impl Vtable {
    /// Total member count, reserved slots included.
    pub fn member_count(&self) -> u32 {
        METHOD_LAST + self.members.len() as u32
    }

    /// Resolves a member index to its slot.
    pub fn member(&self, index: u32) -> RtResult<Member> {
        let missing = || RuntimeError::MemberOutOfRange {
            class: self.name,
            index,
            count: self.member_count(),
        };
        match index {
            METHOD_CONSTRUCTOR => self.constructor.map(Member::Method).ok_or_else(missing),
            METHOD_TO_STRING => self.to_string.map(Member::Method).ok_or_else(missing),
            METHOD_DESTROY | METHOD_GC_VISIT => Err(missing()),
            _ => self
                .members
                .get((index - METHOD_LAST) as usize)
                .copied()
                .ok_or_else(missing),
        }
    }

    /// Resolves a member that must be a method.
    pub fn method(&self, index: u32) -> RtResult<NativeFn> {
        match self.member(index)? {
            Member::Method(f) => Ok(f),
            Member::Field(_) => Err(RuntimeError::MemberKindMismatch {
                class: self.name,
                index,
                expected: "method",
                actual: "field",
            }),
        }
    }

    /// Resolves a member that must be a field, yielding its field index.
    pub fn field_index(&self, index: u32) -> RtResult<u32> {
        match self.member(index)? {
            Member::Field(i) => Ok(i),
            Member::Method(_) => Err(RuntimeError::MemberKindMismatch {
                class: self.name,
                index,
                expected: "field",
                actual: "method",
            }),
        }
    }
}

/// Declared size of a plain object with `fields` value fields.
pub const fn object_size_for_fields(fields: u32) -> u32 {
    OBJECT_HEADER_BYTES + fields * FIELD_BYTES
}

/// Declared size of a function object with the given capture counts.
pub const fn object_size_for_closure(objects: u32, values: u32) -> u32 {
    OBJECT_HEADER_BYTES + (objects + values) * FIELD_BYTES
}

/// Declared size of a module object sized for its tables.
pub const fn object_size_for_module(
    imports: u32,
    values: u32,
    functions: u32,
    classes: u32,
    interfaces: u32,
) -> u32 {
    OBJECT_HEADER_BYTES
        + imports * 8
        + values * FIELD_BYTES
        + functions * 8
        + classes * 8
        + interfaces * 8
        + SLOT_HEADER_BYTES
}

/// The runtime binding of a vtable to the module that defined the class.
/// Objects point at a vtable-env, never at a bare vtable, so method code can
/// resolve module-relative classes and values from any receiver.
#[derive(Debug)]
pub struct VtableEnv {
    pub vtable: Rc<Vtable>,
    pub super_env: Option<Rc<VtableEnv>>,
    module: Cell<Option<ObjRef>>,
}

impl VtableEnv {
    pub fn new(
        vtable: Rc<Vtable>,
        super_env: Option<Rc<VtableEnv>>,
        module: Option<ObjRef>,
    ) -> Self {
        VtableEnv {
            vtable,
            super_env,
            module: Cell::new(module),
        }
    }

    /// The defining module, once bound.
    pub fn module(&self) -> Option<ObjRef> {
        self.module.get()
    }

    /// Binds the defining module. A module's own env is bound to itself
    /// right after the module object is allocated.
    pub(crate) fn bind_module(&self, module: ObjRef) {
        self.module.set(Some(module));
    }
}
