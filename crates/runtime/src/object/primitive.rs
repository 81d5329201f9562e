//! Primitive boxing and the generic conversion utilities.
//!
//! Each primitive type has its own std-module class; boxing wraps an unboxed
//! [`Value`] into an instance of that class. The conversions switch on the
//! vtable's base-type tag, so they work on any object without dispatching.

use crate::error::RtResult;
use crate::heap::ObjRef;
use crate::object::vtable::BaseType;
use crate::object::ObjData;
use crate::runtime::{LangClass, Runtime};
use crate::value::Value;

impl Runtime {
    /// Boxes an unboxed primitive into its wrapper class. `Undefined` and
    /// object values are returned unboxed-as-given (an object is already
    /// boxed).
    pub fn new_primitive(&mut self, value: Value) -> RtResult<ObjRef> {
        let (class, data) = match value {
            Value::Int32(v) => (LangClass::Int32, ObjData::Int32(v)),
            Value::UInt32(v) => (LangClass::UInt32, ObjData::UInt32(v)),
            Value::Int64(v) => (LangClass::Int64, ObjData::Int64(v)),
            Value::UInt64(v) => (LangClass::UInt64, ObjData::UInt64(v)),
            Value::Boolean(v) => (LangClass::Boolean, ObjData::Boolean(v)),
            Value::Float(v) => (LangClass::Float, ObjData::Float(v)),
            Value::Double(v) => (LangClass::Double, ObjData::Double(v)),
            Value::Undefined | Value::Object(_) => {
                return Err(crate::error::RuntimeError::invalid_operation(
                    "new_primitive",
                    "value is not a primitive",
                ))
            }
        };
        let venv = self.lang_class(class);
        self.new_object_raw(&venv, data)
    }

    pub fn new_int32(&mut self, v: i32) -> RtResult<ObjRef> {
        self.new_primitive(Value::Int32(v))
    }

    pub fn new_uint32(&mut self, v: u32) -> RtResult<ObjRef> {
        self.new_primitive(Value::UInt32(v))
    }

    pub fn new_int64(&mut self, v: i64) -> RtResult<ObjRef> {
        self.new_primitive(Value::Int64(v))
    }

    pub fn new_uint64(&mut self, v: u64) -> RtResult<ObjRef> {
        self.new_primitive(Value::UInt64(v))
    }

    pub fn new_boolean(&mut self, v: bool) -> RtResult<ObjRef> {
        self.new_primitive(Value::Boolean(v))
    }

    pub fn new_float(&mut self, v: f32) -> RtResult<ObjRef> {
        self.new_primitive(Value::Float(v))
    }

    pub fn new_double(&mut self, v: f64) -> RtResult<ObjRef> {
        self.new_primitive(Value::Double(v))
    }

    /// Unboxes a primitive wrapper back into a [`Value`], or None if the
    /// object is not a primitive wrapper.
    pub fn primitive_value(&self, obj: ObjRef) -> Option<Value> {
        match self.heap.get(obj).ok()?.data {
            ObjData::Int32(v) => Some(Value::Int32(v)),
            ObjData::UInt32(v) => Some(Value::UInt32(v)),
            ObjData::Int64(v) => Some(Value::Int64(v)),
            ObjData::UInt64(v) => Some(Value::UInt64(v)),
            ObjData::Boolean(v) => Some(Value::Boolean(v)),
            ObjData::Float(v) => Some(Value::Float(v)),
            ObjData::Double(v) => Some(Value::Double(v)),
            _ => None,
        }
    }

    /// Narrows any primitive wrapper to an `i32`, or `default`.
    pub fn object_to_int(&self, obj: ObjRef, default: i32) -> i32 {
        match self.primitive_value(obj) {
            Some(Value::Int32(v)) => v,
            Some(Value::UInt32(v)) => v as i32,
            Some(Value::Int64(v)) => v as i32,
            Some(Value::UInt64(v)) => v as i32,
            Some(Value::Boolean(v)) => v as i32,
            Some(Value::Float(v)) => v as i32,
            Some(Value::Double(v)) => v as i32,
            _ => default,
        }
    }

    /// Widens any primitive wrapper to an `f64`, or `default`.
    pub fn object_to_number(&self, obj: ObjRef, default: f64) -> f64 {
        match self.primitive_value(obj) {
            Some(Value::Int32(v)) => v as f64,
            Some(Value::UInt32(v)) => v as f64,
            Some(Value::Int64(v)) => v as f64,
            Some(Value::UInt64(v)) => v as f64,
            Some(Value::Boolean(v)) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
            Some(Value::Float(v)) => v as f64,
            Some(Value::Double(v)) => v,
            _ => default,
        }
    }

    /// Renders any value for display: primitives and strings directly,
    /// other objects through their to-string hook.
    pub fn to_display(&mut self, value: Value) -> RtResult<String> {
        let obj = match value {
            Value::Undefined => return Ok("undefined".to_owned()),
            Value::Int32(v) => return Ok(v.to_string()),
            Value::UInt32(v) => return Ok(v.to_string()),
            Value::Int64(v) => return Ok(v.to_string()),
            Value::UInt64(v) => return Ok(v.to_string()),
            Value::Boolean(v) => return Ok(v.to_string()),
            Value::Float(v) => return Ok(format!("{v:.6}")),
            Value::Double(v) => return Ok(format!("{v:.6}")),
            Value::Object(obj) => obj,
        };
        let base = self.heap.get(obj)?.venv.vtable.base_type;
        match base {
            BaseType::Int32
            | BaseType::UInt32
            | BaseType::Int64
            | BaseType::UInt64
            | BaseType::Boolean
            | BaseType::Float
            | BaseType::Double => {
                let v = self.primitive_value(obj).unwrap_or(Value::Undefined);
                self.to_display(v)
            }
            BaseType::String => self.string_text(obj),
            BaseType::Function | BaseType::FunctionAwaiter => {
                let name = self.heap.get(obj)?.venv.vtable.name;
                Ok(format!("TS Function {} ({:#x})", name, obj.raw()))
            }
            _ => match self.object_to_string(obj)? {
                Some(s) => {
                    let text = self.string_text(s)?;
                    self.release(s);
                    Ok(text)
                }
                None => {
                    let name = self.heap.get(obj)?.venv.vtable.name;
                    Ok(format!("[object {name}]"))
                }
            },
        }
    }
}
