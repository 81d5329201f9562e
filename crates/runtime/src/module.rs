//! The module container.
//!
//! A module is the composite GC root of one compilation unit: it owns the
//! unit's imported-module handles, static values, function singletons, class
//! vtable-envs, and interface metadata. Member 0 of a module vtable is the
//! unit's `initialize` entry point, which runs under a fresh local scope.
//!
//! Initialization order: allocate, bind the module's own env to itself,
//! install class envs (binding each class vtable to this module), install
//! interface metas, construct the function singletons, then invoke
//! `initialize`.

use std::rc::Rc;

use crate::error::{RtResult, RuntimeError};
use crate::heap::ObjRef;
use crate::object::vtable::{
    InterfaceMeta, Vtable, VtableEnv, METHOD_LAST,
};
use crate::object::{HeapObject, ObjData};
use crate::runtime::Runtime;
use crate::value::Value;

/// Member index of a module's `initialize` method.
pub const MODULE_INITIALIZE: u32 = METHOD_LAST;

#[derive(Debug)]
pub struct ModuleData {
    pub imports: Vec<Option<ObjRef>>,
    pub values: Vec<Value>,
    pub functions: Vec<Option<ObjRef>>,
    pub classes: Vec<Option<Rc<VtableEnv>>>,
    pub interfaces: Vec<Option<Rc<InterfaceMeta>>>,
}

impl ModuleData {
    pub fn new(imports: u32, values: u32, functions: u32, classes: u32, interfaces: u32) -> Self {
        ModuleData {
            imports: vec![None; imports as usize],
            values: vec![Value::Undefined; values as usize],
            functions: vec![None; functions as usize],
            classes: vec![None; classes as usize],
            interfaces: vec![None; interfaces as usize],
        }
    }

    pub(crate) fn push_owned_refs(&self, out: &mut Vec<ObjRef>) {
        out.extend(self.imports.iter().flatten().copied());
        out.extend(self.values.iter().filter_map(Value::as_object));
        out.extend(self.functions.iter().flatten().copied());
    }
}

impl Runtime {
    /// Allocates a module object for `vtable` and binds its self-env. The
    /// vtable must declare a `DataKind::Module` payload.
    pub fn new_module(&mut self, vtable: &Rc<Vtable>) -> RtResult<ObjRef> {
        let data = ObjData::fresh(vtable.data);
        debug_assert!(matches!(data, ObjData::Module(_)));
        let venv = Rc::new(VtableEnv::new(vtable.clone(), None, None));
        let module = self.heap.alloc(
            vtable.object_size,
            HeapObject {
                venv: venv.clone(),
                data,
            },
        )?;
        venv.bind_module(module);
        log::debug!("module \"{}\" created", vtable.name);
        Ok(module)
    }

    fn module_data(&self, module: ObjRef) -> RtResult<&ModuleData> {
        match &self.heap.get(module)?.data {
            ObjData::Module(m) => Ok(m),
            _ => Err(self.payload_mismatch(module, "module")),
        }
    }

    fn module_data_mut(&mut self, module: ObjRef) -> RtResult<&mut ModuleData> {
        let err = self.payload_mismatch(module, "module");
        match &mut self.heap.get_mut(module)?.data {
            ObjData::Module(m) => Ok(m),
            _ => Err(err),
        }
    }

    /// Installs a class: binds `vtable` (and optional super env) to this
    /// module and records the env at class index `index`.
    pub fn module_set_class(
        &mut self,
        module: ObjRef,
        index: usize,
        vtable: &Rc<Vtable>,
        super_env: Option<&Rc<VtableEnv>>,
    ) -> RtResult<Rc<VtableEnv>> {
        let venv = Rc::new(VtableEnv::new(
            vtable.clone(),
            super_env.cloned(),
            Some(module),
        ));
        self.module_data_mut(module)?.classes[index] = Some(venv.clone());
        Ok(venv)
    }

    /// The class env at `index`.
    pub fn module_class(&self, module: ObjRef, index: usize) -> RtResult<Rc<VtableEnv>> {
        self.module_data(module)?
            .classes
            .get(index)
            .cloned()
            .flatten()
            .ok_or_else(|| {
                RuntimeError::invalid_operation("module_class", format!("class {index} not set"))
            })
    }

    /// Installs interface metadata at `index`.
    pub fn module_set_interface(
        &mut self,
        module: ObjRef,
        index: usize,
        meta: &Rc<InterfaceMeta>,
    ) -> RtResult<()> {
        self.module_data_mut(module)?.interfaces[index] = Some(meta.clone());
        Ok(())
    }

    /// The interface metadata at `index`.
    pub fn module_interface(&self, module: ObjRef, index: usize) -> RtResult<Rc<InterfaceMeta>> {
        self.module_data(module)?
            .interfaces
            .get(index)
            .cloned()
            .flatten()
            .ok_or_else(|| {
                RuntimeError::invalid_operation(
                    "module_interface",
                    format!("interface {index} not set"),
                )
            })
    }

    /// Constructs the function singleton of class `class_index` and records
    /// it at function index `func_index`. The module owns the function.
    pub fn module_new_function(
        &mut self,
        module: ObjRef,
        func_index: usize,
        class_index: usize,
    ) -> RtResult<ObjRef> {
        let venv = self.module_class(module, class_index)?;
        let func = self.new_object(&venv, &[])?;
        let old = {
            let data = self.module_data_mut(module)?;
            std::mem::replace(&mut data.functions[func_index], Some(func))
        };
        if let Some(old) = old {
            self.release(old);
        }
        Ok(func)
    }

    /// The function singleton at `index`.
    pub fn module_function(&self, module: ObjRef, index: usize) -> RtResult<ObjRef> {
        self.module_data(module)?
            .functions
            .get(index)
            .copied()
            .flatten()
            .ok_or_else(|| {
                RuntimeError::invalid_operation(
                    "module_function",
                    format!("function {index} not set"),
                )
            })
    }

    /// Calls the function singleton at `index`.
    pub fn module_call_function(
        &mut self,
        module: ObjRef,
        index: usize,
        args: &[Value],
    ) -> RtResult<Value> {
        let func = self.module_function(module, index)?;
        self.function_call(func, args)
    }

    /// The static value at `index`.
    pub fn module_value(&self, module: ObjRef, index: usize) -> RtResult<Value> {
        Ok(self
            .module_data(module)?
            .values
            .get(index)
            .copied()
            .unwrap_or(Value::Undefined))
    }

    /// The static value at `index` as an object handle.
    pub fn module_object(&self, module: ObjRef, index: usize) -> RtResult<ObjRef> {
        self.module_value(module, index)?
            .as_object()
            .ok_or(RuntimeError::NullObject {
                operation: "module_object",
            })
    }

    /// Stores a static value, releasing any previously stored object.
    /// Ownership of an object value transfers to the module.
    pub fn module_set_value(&mut self, module: ObjRef, index: usize, value: Value) -> RtResult<()> {
        let old = {
            let data = self.module_data_mut(module)?;
            std::mem::replace(&mut data.values[index], value)
        };
        if let Some(old) = old.as_object() {
            self.release(old);
        }
        Ok(())
    }

    /// Records an imported module handle.
    pub fn module_set_import(
        &mut self,
        module: ObjRef,
        index: usize,
        import: ObjRef,
    ) -> RtResult<()> {
        self.add_ref(import);
        let old = {
            let data = self.module_data_mut(module)?;
            std::mem::replace(&mut data.imports[index], Some(import))
        };
        if let Some(old) = old {
            self.release(old);
        }
        Ok(())
    }

    /// Runs the module's `initialize` member under a fresh local scope.
    pub fn module_initialize(&mut self, module: ObjRef) -> RtResult<Value> {
        let name = self.heap.get(module)?.venv.vtable.name;
        log::debug!("module \"{name}\" initialize");
        self.with_scope(4, |rt| rt.method_call(module, MODULE_INITIALIZE, &[]))
    }

    /// The defining module of an object, through its vtable-env.
    pub fn module_of(&self, obj: ObjRef) -> RtResult<Option<ObjRef>> {
        Ok(self.heap.get(obj)?.venv.module())
    }
}
