//! The runtime aggregate.
//!
//! One `Runtime` owns the heap, the backend binding, the std module, the
//! exception slot, and the try-block stack, and provides the dispatch entry
//! points compiled code calls: object construction, method/field access,
//! super calls, and the std-module surfaces (console, timers, promises).
//!
//! User code runs inside method invocations driven by the backend's task
//! pump; every mutation of runtime state happens on that single thread.

use std::rc::Rc;

use hashbrown::HashSet;

use crate::console::{self, ConsoleSink, StdoutSink};
use crate::error::{RtResult, RuntimeError};
use crate::eventloop::EventLoopBackend;
use crate::exception::{self, TryBlock};
use crate::heap::{Heap, HeapConfig, HeapStats, ObjRef, StrongRef, WeakRef};
use crate::object::vtable::{
    object_size_for_closure, object_size_for_fields, object_size_for_module, BaseType, DataKind,
    Member, Vtable, VtableEnv, METHOD_TO_STRING,
};
use crate::object::{HeapObject, ObjData};
use crate::promise;
use crate::timer;
use crate::value::{Value, ValueKind};

/// The language classes at the head of the std module's class table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum LangClass {
    Int32 = 0,
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
}

/// Number of language classes.
pub const LANG_CLASS_MAX: usize = 12;

/// The std classes following the language classes, in table order. The
/// first two double as the value indices of the console and timer
/// singletons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum StdObject {
    Console = 0,
    Timer,
    Promise,
    PromiseAwaiter,
    PromiseResolver,
    PromiseRejecter,
    ExceptionError,
}

/// Number of std classes.
pub const STD_OBJECT_MAX: usize = 7;

pub struct Runtime {
    pub(crate) heap: Heap,
    pub(crate) backend: Box<dyn EventLoopBackend>,
    pub(crate) console: Box<dyn ConsoleSink>,
    pub(crate) exception_value: Option<ObjRef>,
    pub(crate) try_blocks: Vec<TryBlock>,
    /// Promises pinned by a scheduled drain task; part of the GC root set.
    pub(crate) drain_pins: HashSet<ObjRef>,
    pub(crate) root_exceptions: u32,
    std_module: Option<ObjRef>,
    std_root: Option<StrongRef>,
}

impl Runtime {
    /// Creates a runtime over `backend` with the default heap sizing.
    pub fn new(backend: Box<dyn EventLoopBackend>) -> RtResult<Self> {
        Self::with_config(backend, HeapConfig::default())
    }

    /// Creates a runtime with explicit heap sizing.
    pub fn with_config(backend: Box<dyn EventLoopBackend>, config: HeapConfig) -> RtResult<Self> {
        let mut rt = Runtime {
            heap: Heap::new(config),
            backend,
            console: Box::new(StdoutSink),
            exception_value: None,
            try_blocks: Vec::new(),
            drain_pins: HashSet::new(),
            root_exceptions: 0,
            std_module: None,
            std_root: None,
        };
        let std_module = rt.create_std_module()?;
        rt.std_module = Some(std_module);
        rt.std_root = Some(rt.heap.make_strong(std_module));
        Ok(rt)
    }

    /// The heap, for inspection.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Heap census.
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// The std module object.
    pub fn std_module(&self) -> ObjRef {
        self.std_module.expect("std module initialized")
    }

    /// Backend clock, monotonic milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.backend.now_ms()
    }

    // ------------------------------------------------------------------
    // Construction and dispatch

    /// Allocates an instance of the class behind `venv` and runs its
    /// constructor with `args`. The caller owns the returned reference.
    pub fn new_object(&mut self, venv: &Rc<VtableEnv>, args: &[Value]) -> RtResult<ObjRef> {
        let data = ObjData::fresh(venv.vtable.data);
        let obj = self.heap.alloc(
            venv.vtable.object_size,
            HeapObject {
                venv: venv.clone(),
                data,
            },
        )?;
        if let Some(constructor) = venv.vtable.constructor {
            if let Err(err) = constructor(self, obj, args) {
                self.heap.release(obj);
                return Err(err);
            }
        }
        Ok(obj)
    }

    /// Allocates an instance with a prebuilt payload, bypassing the
    /// constructor. Used by the string, primitive, and error builders whose
    /// payloads carry data the value union cannot express.
    pub(crate) fn new_object_raw(
        &mut self,
        venv: &Rc<VtableEnv>,
        data: ObjData,
    ) -> RtResult<ObjRef> {
        self.heap.alloc(
            venv.vtable.object_size,
            HeapObject {
                venv: venv.clone(),
                data,
            },
        )
    }

    /// Calls member `index` of `obj`'s class.
    pub fn method_call(&mut self, obj: ObjRef, index: u32, args: &[Value]) -> RtResult<Value> {
        let method = self.heap.get(obj)?.venv.vtable.method(index)?;
        method(self, obj, args)
    }

    /// Calls member `index` of the super class of `obj`'s class.
    pub fn super_call(&mut self, obj: ObjRef, index: u32, args: &[Value]) -> RtResult<Value> {
        let venv = self.heap.get(obj)?.venv.clone();
        let super_vtable =
            venv.vtable
                .super_class
                .as_ref()
                .ok_or(RuntimeError::InvalidOperation {
                    operation: "super_call",
                    reason: format!("class \"{}\" has no super class", venv.vtable.name),
                })?;
        let method = super_vtable.method(index)?;
        method(self, obj, args)
    }

    /// Reads field member `index` of `obj`.
    pub fn field(&self, obj: ObjRef, index: u32) -> RtResult<Value> {
        let object = self.heap.get(obj)?;
        let field_index = object.venv.vtable.field_index(index)? as usize;
        match &object.data {
            ObjData::Fields(fields) => {
                Ok(fields.get(field_index).copied().unwrap_or(Value::Undefined))
            }
            _ => Err(self.payload_mismatch(obj, "field object")),
        }
    }

    /// Writes field member `index` of `obj`, releasing the previous object
    /// occupant. Ownership of an object value transfers to `obj`.
    pub fn set_field(&mut self, obj: ObjRef, index: u32, value: Value) -> RtResult<()> {
        let err = self.payload_mismatch(obj, "field object");
        let object = self.heap.get_mut(obj)?;
        let field_index = object.venv.vtable.field_index(index)? as usize;
        let old = match &mut object.data {
            ObjData::Fields(fields) => {
                if field_index >= fields.len() {
                    return Err(err);
                }
                std::mem::replace(&mut fields[field_index], value)
            }
            _ => return Err(err),
        };
        if let Some(old) = old.as_object() {
            self.heap.release(old);
        }
        Ok(())
    }

    /// True if `obj` is an instance of the class behind `venv`, directly or
    /// through its super chain.
    pub fn instance_of(&self, obj: ObjRef, venv: &Rc<VtableEnv>) -> RtResult<bool> {
        let mut current = Some(self.heap.get(obj)?.venv.clone());
        while let Some(env) = current {
            if Rc::ptr_eq(&env, venv) {
                return Ok(true);
            }
            current = env.super_env.clone();
        }
        Ok(false)
    }

    /// The base-type tag of `obj`'s class.
    pub fn base_type(&self, obj: ObjRef) -> RtResult<BaseType> {
        Ok(self.heap.get(obj)?.venv.vtable.base_type)
    }

    /// Runs the class's to-string hook, yielding an owned string object, or
    /// None when the class declares no hook.
    pub fn object_to_string(&mut self, obj: ObjRef) -> RtResult<Option<ObjRef>> {
        let has_hook = self.heap.get(obj)?.venv.vtable.to_string.is_some();
        if !has_hook {
            return Ok(None);
        }
        let ret = self.method_call(obj, METHOD_TO_STRING, &[])?;
        Ok(ret.as_object())
    }

    pub(crate) fn payload_mismatch(&self, obj: ObjRef, expected: &'static str) -> RuntimeError {
        let class = self
            .heap
            .get(obj)
            .map(|o| o.venv.vtable.name)
            .unwrap_or("<stale>");
        RuntimeError::PayloadMismatch { class, expected }
    }

    // ------------------------------------------------------------------
    // Lifetime surface

    pub fn add_ref(&mut self, obj: ObjRef) {
        self.heap.add_ref(obj);
    }

    pub fn release(&mut self, obj: ObjRef) {
        self.heap.release(obj);
    }

    pub fn ref_count(&self, obj: ObjRef) -> u32 {
        self.heap.ref_count(obj)
    }

    pub fn make_weak(&mut self, obj: ObjRef) -> RtResult<WeakRef> {
        self.heap.make_weak(obj)
    }

    pub fn weak_get(&self, weak: WeakRef) -> Option<ObjRef> {
        self.heap.weak_get(weak)
    }

    pub fn weak_release(&mut self, weak: WeakRef) {
        self.heap.weak_release(weak)
    }

    pub fn make_strong(&mut self, obj: ObjRef) -> StrongRef {
        self.heap.make_strong(obj)
    }

    pub fn strong_release(&mut self, strong: StrongRef) -> Option<ObjRef> {
        self.heap.strong_release(strong)
    }

    /// Runs `f` under a fresh local scope, restoring the scope depth on
    /// every exit path.
    pub fn with_scope<T>(
        &mut self,
        slots: usize,
        f: impl FnOnce(&mut Runtime) -> RtResult<T>,
    ) -> RtResult<T> {
        let before = self.heap.scope_depth();
        self.heap.push_scope(slots);
        let result = f(self);
        self.heap.truncate_scopes(before);
        result
    }

    /// Pushes a local scope of `slots` object slots; returns the new depth.
    /// Callers that cannot use [`Runtime::with_scope`] must pop on every
    /// exit path.
    pub fn push_scope(&mut self, slots: usize) -> usize {
        self.heap.push_scope(slots)
    }

    /// Pops the top local scope.
    pub fn pop_scope(&mut self) {
        self.heap.pop_scope();
    }

    /// Roots an object in the top scope's slot `index`.
    pub fn set_local(&mut self, index: usize, obj: Option<ObjRef>) {
        self.heap.set_local(index, obj);
    }

    /// Runs a full mark-and-sweep pass; returns the number of reclaimed
    /// slots. Runtime-held references (the exception slot, scheduled
    /// drains) join the root set.
    pub fn collect_garbage(&mut self) -> usize {
        let mut extra: Vec<ObjRef> = Vec::new();
        extra.extend(self.exception_value);
        extra.extend(self.drain_pins.iter().copied());
        self.heap.collect(&extra)
    }

    // ------------------------------------------------------------------
    // std module

    /// The env of a language class.
    pub fn lang_class(&self, class: LangClass) -> Rc<VtableEnv> {
        self.module_class(self.std_module(), class as usize)
            .expect("lang class installed")
    }

    pub(crate) fn string_class(&self) -> Rc<VtableEnv> {
        self.lang_class(LangClass::String)
    }

    /// The env of a std class.
    pub fn std_class(&self, class: StdObject) -> RtResult<Rc<VtableEnv>> {
        self.module_class(self.std_module(), LANG_CLASS_MAX + class as usize)
    }

    /// The std singleton behind `class` (console and timer only).
    pub fn std_object(&self, class: StdObject) -> RtResult<ObjRef> {
        match class {
            StdObject::Console | StdObject::Timer => {
                self.module_object(self.std_module(), class as usize)
            }
            _ => Err(RuntimeError::invalid_operation(
                "std_object",
                "class has no singleton",
            )),
        }
    }

    /// True if `obj` is a direct instance of the given std class.
    pub fn is_std_instance(&self, obj: ObjRef, class: StdObject) -> RtResult<bool> {
        let venv = self.heap.get(obj)?.venv.clone();
        Ok(Rc::ptr_eq(&venv, &self.std_class(class)?))
    }

    fn create_std_module(&mut self) -> RtResult<ObjRef> {
        let vtable = std_module_vtable();
        let module = self.new_module(&vtable)?;

        let lang: [(LangClass, Rc<Vtable>); LANG_CLASS_MAX] = [
            (LangClass::Int32, primitive_vtable("int32", BaseType::Int32, DataKind::Int32)),
            (LangClass::UInt32, primitive_vtable("uint32", BaseType::UInt32, DataKind::UInt32)),
            (LangClass::Int64, primitive_vtable("int64", BaseType::Int64, DataKind::Int64)),
            (LangClass::UInt64, primitive_vtable("uint64", BaseType::UInt64, DataKind::UInt64)),
            (
                LangClass::Boolean,
                primitive_vtable("boolean", BaseType::Boolean, DataKind::Boolean),
            ),
            (LangClass::Float, primitive_vtable("float", BaseType::Float, DataKind::Float)),
            (LangClass::Double, primitive_vtable("double", BaseType::Double, DataKind::Double)),
            (LangClass::String, string_vtable()),
            (LangClass::BigInt, opaque_vtable("bigint", BaseType::BigInt)),
            (LangClass::Array, opaque_vtable("array", BaseType::Array)),
            (LangClass::Map, opaque_vtable("map", BaseType::Map)),
            (LangClass::Set, opaque_vtable("set", BaseType::Set)),
        ];
        for (class, vtable) in lang {
            self.module_set_class(module, class as usize, &vtable, None)?;
        }

        let std: [(StdObject, Rc<Vtable>); STD_OBJECT_MAX] = [
            (StdObject::Console, console_vtable()),
            (StdObject::Timer, timer_vtable()),
            (StdObject::Promise, promise_vtable()),
            (StdObject::PromiseAwaiter, awaiter_promise_vtable()),
            (
                StdObject::PromiseResolver,
                resolver_vtable("promise_resolver"),
            ),
            (
                StdObject::PromiseRejecter,
                resolver_vtable("promise_rejecter"),
            ),
            (StdObject::ExceptionError, error_vtable()),
        ];
        for (class, vtable) in std {
            self.module_set_class(module, LANG_CLASS_MAX + class as usize, &vtable, None)?;
        }

        // Singletons: console at value 0, timer at value 1.
        let console_env = self.module_class(module, LANG_CLASS_MAX + StdObject::Console as usize)?;
        let console = self.new_object(&console_env, &[])?;
        self.module_set_value(module, StdObject::Console as usize, Value::Object(console))?;

        let timer_env = self.module_class(module, LANG_CLASS_MAX + StdObject::Timer as usize)?;
        let timer = self.new_object(&timer_env, &[])?;
        self.module_set_value(module, StdObject::Timer as usize, Value::Object(timer))?;

        Ok(module)
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // Teardown: the runtime owns the std module and releases it.
        if let Some(root) = self.std_root.take() {
            self.heap.strong_release(root);
        }
        if let Some(exc) = self.exception_value.take() {
            self.heap.release(exc);
        }
        if let Some(module) = self.std_module.take() {
            self.heap.release(module);
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("stats", &self.heap.stats())
            .field("try_depth", &self.try_blocks.len())
            .field("root_exceptions", &self.root_exceptions)
            .finish()
    }
}

// ---------------------------------------------------------------------
// std vtables

fn std_module_vtable() -> Rc<Vtable> {
    fn std_module_init(
        _rt: &mut Runtime,
        _this: ObjRef,
        _args: &[Value],
    ) -> RtResult<Value> {
        Ok(Value::Undefined)
    }
    let classes = (LANG_CLASS_MAX + STD_OBJECT_MAX) as u32;
    Rc::new(Vtable {
        name: "std",
        super_class: None,
        object_size: object_size_for_module(0, 2, 0, classes, 0),
        base_type: BaseType::Module,
        return_kind: ValueKind::Void,
        data: DataKind::Module {
            imports: 0,
            values: 2,
            functions: 0,
            classes,
            interfaces: 0,
        },
        interfaces: Vec::new(),
        constructor: None,
        to_string: None,
        members: vec![Member::Method(std_module_init)],
    })
}

fn primitive_vtable(name: &'static str, base_type: BaseType, data: DataKind) -> Rc<Vtable> {
    Rc::new(Vtable {
        name,
        super_class: None,
        object_size: object_size_for_fields(1),
        base_type,
        return_kind: ValueKind::Void,
        data,
        interfaces: Vec::new(),
        constructor: None,
        to_string: None,
        members: Vec::new(),
    })
}

fn string_vtable() -> Rc<Vtable> {
    Rc::new(Vtable {
        name: "string",
        super_class: None,
        object_size: object_size_for_fields(2),
        base_type: BaseType::String,
        return_kind: ValueKind::Void,
        data: DataKind::String,
        interfaces: Vec::new(),
        constructor: None,
        to_string: None,
        members: Vec::new(),
    })
}

fn opaque_vtable(name: &'static str, base_type: BaseType) -> Rc<Vtable> {
    Rc::new(Vtable {
        name,
        super_class: None,
        object_size: object_size_for_fields(0),
        base_type,
        return_kind: ValueKind::Void,
        data: DataKind::Fields(0),
        interfaces: Vec::new(),
        constructor: None,
        to_string: None,
        members: Vec::new(),
    })
}

fn console_vtable() -> Rc<Vtable> {
    Rc::new(Vtable {
        name: "console",
        super_class: None,
        object_size: object_size_for_fields(0),
        base_type: BaseType::Object,
        return_kind: ValueKind::Void,
        data: DataKind::Console,
        interfaces: Vec::new(),
        constructor: None,
        to_string: None,
        members: vec![
            Member::Method(console::console_info),
            Member::Method(console::console_log),
            Member::Method(console::console_debug),
            Member::Method(console::console_warn),
            Member::Method(console::console_error),
            Member::Method(console::console_trace),
        ],
    })
}

fn timer_vtable() -> Rc<Vtable> {
    Rc::new(Vtable {
        name: "timer",
        super_class: None,
        object_size: object_size_for_fields(4),
        base_type: BaseType::Object,
        return_kind: ValueKind::Void,
        data: DataKind::Timer,
        interfaces: Vec::new(),
        constructor: None,
        to_string: None,
        members: vec![
            Member::Method(timer::timer_set_timeout),
            Member::Method(timer::timer_clear_timeout),
            Member::Method(timer::timer_set_interval),
            Member::Method(timer::timer_clear_interval),
        ],
    })
}

fn promise_vtable() -> Rc<Vtable> {
    Rc::new(Vtable {
        name: "std_promise",
        super_class: None,
        object_size: object_size_for_fields(4),
        base_type: BaseType::Object,
        return_kind: ValueKind::Void,
        data: DataKind::Promise,
        interfaces: Vec::new(),
        constructor: Some(promise::promise_constructor),
        to_string: None,
        members: vec![
            Member::Method(promise::promise_then),
            Member::Method(promise::promise_catch),
            Member::Method(promise::promise_finally),
            Member::Method(promise::promise_then_promise),
        ],
    })
}

fn awaiter_promise_vtable() -> Rc<Vtable> {
    Rc::new(Vtable {
        name: "std_promise_awaiter",
        super_class: None,
        object_size: object_size_for_fields(4),
        base_type: BaseType::Object,
        return_kind: ValueKind::Void,
        data: DataKind::Promise,
        interfaces: Vec::new(),
        constructor: Some(promise::awaiter_promise_constructor),
        to_string: None,
        members: vec![
            Member::Method(promise::promise_then),
            Member::Method(promise::promise_catch),
            Member::Method(promise::promise_finally),
            Member::Method(promise::promise_then_promise),
        ],
    })
}

fn resolver_vtable(name: &'static str) -> Rc<Vtable> {
    Rc::new(Vtable {
        name,
        super_class: None,
        object_size: object_size_for_closure(1, 0),
        base_type: BaseType::Function,
        return_kind: ValueKind::Void,
        data: DataKind::Closure {
            objects: 1,
            values: 0,
        },
        interfaces: Vec::new(),
        constructor: Some(promise::resolver_rejecter_constructor),
        to_string: None,
        members: vec![Member::Method(promise::resolver_rejecter_impl)],
    })
}

fn error_vtable() -> Rc<Vtable> {
    Rc::new(Vtable {
        name: "exception_error",
        super_class: None,
        object_size: object_size_for_fields(6),
        base_type: BaseType::Object,
        return_kind: ValueKind::Void,
        data: DataKind::Error,
        interfaces: Vec::new(),
        constructor: None,
        to_string: Some(exception::error_to_string),
        members: Vec::new(),
    })
}
