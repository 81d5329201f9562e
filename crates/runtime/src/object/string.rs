//! The managed string type.
//!
//! Strings come in two forms: const strings borrow a static buffer the
//! compiled module carries, dynamic strings own their storage. The UTF-16
//! flag is declared by the format but not exercised; every string in this
//! tree is UTF-8.

use crate::error::{RtResult, RuntimeError};
use crate::heap::ObjRef;
use crate::object::{HeapObject, ObjData};
use crate::runtime::Runtime;
use crate::value::Value;

/// Maximum representable string length (the length field is 30 bits wide).
pub const MAX_STRING_LEN: usize = (1 << 30) - 1;

#[derive(Debug)]
pub enum StrBuf {
    /// Borrowed from the compiled module's constant data.
    Const(&'static str),
    /// Heap-owned copy.
    Owned(String),
}

#[derive(Debug)]
pub struct StringData {
    pub is_utf16: bool,
    pub buf: StrBuf,
}

impl StringData {
    pub fn empty() -> Self {
        StringData {
            is_utf16: false,
            buf: StrBuf::Const(""),
        }
    }

    pub fn as_str(&self) -> &str {
        match &self.buf {
            StrBuf::Const(s) => s,
            StrBuf::Owned(s) => s,
        }
    }

    pub fn len(&self) -> usize {
        self.as_str().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_str().is_empty()
    }

    pub fn is_const(&self) -> bool {
        matches!(self.buf, StrBuf::Const(_))
    }
}

impl Runtime {
    /// Creates an owned string from `text`.
    pub fn new_string(&mut self, text: impl Into<String>) -> RtResult<ObjRef> {
        let text = text.into();
        debug_assert!(text.len() <= MAX_STRING_LEN);
        self.new_string_data(StringData {
            is_utf16: false,
            buf: StrBuf::Owned(text),
        })
    }

    /// Creates a const string borrowing the compiled constant `text`.
    pub fn new_string_const(&mut self, text: &'static str) -> RtResult<ObjRef> {
        debug_assert!(text.len() <= MAX_STRING_LEN);
        self.new_string_data(StringData {
            is_utf16: false,
            buf: StrBuf::Const(text),
        })
    }

    fn new_string_data(&mut self, data: StringData) -> RtResult<ObjRef> {
        let venv = self.string_class();
        let size = venv.vtable.object_size + data.len().min(MAX_STRING_LEN) as u32;
        self.heap.alloc(
            size,
            HeapObject {
                venv,
                data: ObjData::String(data),
            },
        )
    }

    /// Duplicates a string object, preserving its const-ness.
    pub fn string_dup(&mut self, obj: ObjRef) -> RtResult<ObjRef> {
        let object = self.heap.get(obj)?;
        match &object.data {
            ObjData::String(s) => match s.buf {
                StrBuf::Const(text) => self.new_string_const(text),
                StrBuf::Owned(ref text) => {
                    let copy = text.clone();
                    self.new_string(copy)
                }
            },
            _ => Err(self.payload_mismatch(obj, "string")),
        }
    }

    /// The text of a string object.
    pub fn string_text(&self, obj: ObjRef) -> RtResult<String> {
        match &self.heap.get(obj)?.data {
            ObjData::String(s) => Ok(s.as_str().to_owned()),
            _ => Err(self.payload_mismatch(obj, "string")),
        }
    }

    /// String length in bytes, 0 for anything that is not a string.
    pub fn string_length(&self, obj: ObjRef) -> usize {
        match self.heap.get(obj) {
            Ok(HeapObject {
                data: ObjData::String(s),
                ..
            }) => s.len(),
            _ => 0,
        }
    }

    /// Renders a string value into `buf`, truncating at the buffer bound.
    /// Returns the number of bytes written.
    pub fn string_to_buf(&self, value: Value, buf: &mut [u8]) -> RtResult<usize> {
        let text = match value.as_object() {
            Some(obj) => self.string_text(obj)?,
            None => return Err(RuntimeError::NullObject {
                operation: "string_to_buf",
            }),
        };
        let n = text.len().min(buf.len());
        buf[..n].copy_from_slice(&text.as_bytes()[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_const_and_owned_forms() {
        let c = StringData {
            is_utf16: false,
            buf: StrBuf::Const("hello"),
        };
        assert!(c.is_const());
        assert_eq!(c.as_str(), "hello");
        let o = StringData {
            is_utf16: false,
            buf: StrBuf::Owned("world".to_owned()),
        };
        assert!(!o.is_const());
        assert_eq!(o.len(), 5);
    }
}
