//! Interface references and interface dispatch.
//!
//! An interface reference is a fat pointer: the implementing object plus the
//! member-table index where the interface's members start in that object's
//! class. Recovering it from an object is a linear scan of the class's
//! declared interface entries; from there, interface-local member index `i`
//! maps to class member index `member_start + i`.

use std::rc::Rc;

use crate::error::{RtResult, RuntimeError};
use crate::heap::ObjRef;
use crate::object::vtable::InterfaceMeta;
use crate::runtime::Runtime;
use crate::value::Value;

/// A fat pointer to one interface of one object. Stable for as long as the
/// object lives, independent of the class layout behind it.
#[derive(Debug, Clone, Copy)]
pub struct InterfaceRef {
    pub object: ObjRef,
    pub member_start: u32,
}

impl Runtime {
    /// Finds `meta`'s entry on `obj`'s class, scanning the declared
    /// interface list.
    pub fn interface_of(
        &self,
        obj: ObjRef,
        meta: &Rc<InterfaceMeta>,
    ) -> RtResult<Option<InterfaceRef>> {
        let venv = self.heap.get(obj)?.venv.clone();
        Ok(venv
            .vtable
            .interfaces
            .iter()
            .find(|e| Rc::ptr_eq(&e.meta, meta))
            .map(|e| InterfaceRef {
                object: obj,
                member_start: e.member_start,
            }))
    }

    /// Calls interface-local method `index` through an interface reference.
    pub fn interface_method_call(
        &mut self,
        iface: InterfaceRef,
        index: u32,
        args: &[Value],
    ) -> RtResult<Value> {
        self.method_call(iface.object, iface.member_start + index, args)
    }

    /// Reads the interface-local field `index` through an interface
    /// reference.
    pub fn interface_field(&self, iface: InterfaceRef, index: u32) -> RtResult<Value> {
        self.field(iface.object, iface.member_start + index)
    }

    /// Recovers the implementing object from an interface reference; errors
    /// on a dead object so misuse surfaces early.
    pub fn interface_object(&self, iface: InterfaceRef) -> RtResult<ObjRef> {
        if self.heap.is_live(iface.object) {
            Ok(iface.object)
        } else {
            Err(RuntimeError::StaleHandle {
                handle: iface.object.raw(),
            })
        }
    }
}
