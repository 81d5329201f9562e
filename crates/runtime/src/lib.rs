//! # tsrun-runtime
//!
//! The core of a managed-object runtime for ahead-of-time compiled
//! TypeScript-like programs: compiled modules are native code that talks to
//! this crate for allocation, dispatch, scheduling, and unwinding.
//!
//! ## Subsystems
//!
//! - **Heap**: size-class clusters with run-length free lists, a
//!   large-object table, strong reference counting for eager reclamation,
//!   mark-and-sweep for cycles, weak references, and a stack of precise
//!   local scopes.
//! - **Object model**: vtable-env-bound objects with single-inheritance
//!   dispatch, multiple interfaces, primitive and string boxing, closures
//!   with declared capture layouts, and tagged class unions.
//! - **Module container**: one composite GC root per compilation unit,
//!   owning its classes, statics, and function singletons.
//! - **Event loop & timers**: a backend-supplied cooperative loop
//!   ([`eventloop::EventLoopBackend`]) with a `(deadline, id)`-ordered timer
//!   service; [`eventloop::LocalBackend`] is the in-process deterministic
//!   implementation.
//! - **Promise engine**: sticky at-most-once settlement, ordered resolve
//!   entries drained asynchronously, promise adoption, and async-function
//!   awaiter frames resumed by label.
//! - **Exceptions**: a try-block stack with scope-snapshot unwinding,
//!   catch/finally sequencing, and a root-exception sink.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tsrun_runtime::eventloop::LocalBackend;
//! use tsrun_runtime::runtime::Runtime;
//! use tsrun_runtime::value::Value;
//!
//! # fn main() -> Result<(), tsrun_runtime::error::RuntimeError> {
//! let backend = LocalBackend::new();
//! let mut rt = Runtime::new(Box::new(backend.clone()))?;
//! let hello = rt.new_string_const("hello world")?;
//! rt.console_info(&[Value::Object(hello)])?;
//! backend.run(&mut rt);
//! # Ok(())
//! # }
//! ```

pub mod awaiter;
pub mod console;
pub mod error;
pub mod eventloop;
pub mod exception;
pub mod heap;
pub mod module;
pub mod object;
pub mod promise;
pub mod runtime;
pub mod timer;
pub mod value;

pub use error::{RtResult, RuntimeError};
pub use heap::{Heap, HeapConfig, HeapStats, ObjRef, StrongRef, WeakRef};
pub use object::interface::InterfaceRef;
pub use object::union::{UnionLayout, UnionRef};
pub use object::vtable::{
    BaseType, DataKind, InterfaceEntry, InterfaceMeta, Member, NativeFn, Vtable, VtableEnv,
    METHOD_CONSTRUCTOR, METHOD_LAST, METHOD_TO_STRING,
};
pub use promise::PromiseState;
pub use runtime::{LangClass, Runtime, StdObject, LANG_CLASS_MAX};
pub use value::{Value, ValueKind};
