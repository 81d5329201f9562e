//! Shared fixture for the integration suites: a runtime over the
//! deterministic in-process backend, with console output captured.

use tsrun_runtime::console::CaptureSink;
use tsrun_runtime::eventloop::LocalBackend;
use tsrun_runtime::object::vtable::{object_size_for_module, BaseType, DataKind, Member, Vtable};
use tsrun_runtime::runtime::Runtime;
use tsrun_runtime::value::ValueKind;

use std::rc::Rc;

pub struct Fixture {
    pub backend: LocalBackend,
    pub rt: Runtime,
    pub sink: CaptureSink,
}

#[allow(dead_code)]
impl Fixture {
    /// Pumps the loop until it drains to empty.
    pub fn run(&mut self) -> bool {
        self.backend.run(&mut self.rt)
    }

    /// Console line bodies captured so far.
    pub fn lines(&self) -> Vec<String> {
        self.sink.texts()
    }
}

pub fn fixture() -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();
    let backend = LocalBackend::new();
    let mut rt = Runtime::new(Box::new(backend.clone())).expect("runtime creation");
    let sink = CaptureSink::new();
    rt.set_console_sink(Box::new(sink.clone()));
    Fixture { backend, rt, sink }
}

/// A module vtable for test programs: `initialize` plus the declared tables.
#[allow(dead_code)]
pub fn module_vtable(
    name: &'static str,
    initialize: tsrun_runtime::object::vtable::NativeFn,
    values: u32,
    functions: u32,
    classes: u32,
    interfaces: u32,
) -> Rc<Vtable> {
    Rc::new(Vtable {
        name,
        super_class: None,
        object_size: object_size_for_module(0, values, functions, classes, interfaces),
        base_type: BaseType::Module,
        return_kind: ValueKind::Void,
        data: DataKind::Module {
            imports: 0,
            values,
            functions,
            classes,
            interfaces,
        },
        interfaces: Vec::new(),
        constructor: None,
        to_string: None,
        members: vec![Member::Method(initialize)],
    })
}

/// A plain function class with no captured state.
#[allow(dead_code)]
pub fn function_vtable(
    name: &'static str,
    body: tsrun_runtime::object::vtable::NativeFn,
    return_kind: ValueKind,
) -> Rc<Vtable> {
    closure_vtable(name, body, return_kind, 0, 0)
}

/// A function class capturing `objects` owned references and `values` plain
/// locals.
#[allow(dead_code)]
pub fn closure_vtable(
    name: &'static str,
    body: tsrun_runtime::object::vtable::NativeFn,
    return_kind: ValueKind,
    objects: u32,
    values: u32,
) -> Rc<Vtable> {
    Rc::new(Vtable {
        name,
        super_class: None,
        object_size: tsrun_runtime::object::vtable::object_size_for_closure(objects, values),
        base_type: BaseType::Function,
        return_kind,
        data: DataKind::Closure { objects, values },
        interfaces: Vec::new(),
        constructor: None,
        to_string: None,
        members: vec![Member::Method(body)],
    })
}

/// An async-body awaiter function class.
#[allow(dead_code)]
pub fn awaiter_vtable(
    name: &'static str,
    body: tsrun_runtime::object::vtable::NativeFn,
    objects: u32,
    values: u32,
) -> Rc<Vtable> {
    Rc::new(Vtable {
        name,
        super_class: None,
        object_size: tsrun_runtime::object::vtable::object_size_for_closure(objects, values),
        base_type: BaseType::FunctionAwaiter,
        return_kind: ValueKind::Void,
        data: DataKind::Awaiter { objects, values },
        interfaces: Vec::new(),
        constructor: None,
        to_string: None,
        members: vec![Member::Method(body)],
    })
}
