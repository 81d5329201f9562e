//! The console surface.
//!
//! The std module carries one console singleton whose six members (info,
//! log, debug, warn, error, trace) concatenate their arguments through the
//! generic display conversion and hand the line to a pluggable sink. The
//! default sink prints `[TS <LEVEL>] <line>` on stdout; tests install a
//! capturing sink and assert on the recorded lines.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::RtResult;
use crate::heap::ObjRef;
use crate::runtime::{Runtime, StdObject};
use crate::value::Value;

/// Console output levels, in member order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Info,
    Log,
    Debug,
    Warn,
    Error,
    Trace,
}

impl ConsoleLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsoleLevel::Info => "INFO",
            ConsoleLevel::Log => "LOG",
            ConsoleLevel::Debug => "DEBUG",
            ConsoleLevel::Warn => "WARN",
            ConsoleLevel::Error => "ERROR",
            ConsoleLevel::Trace => "TRACE",
        }
    }
}

/// Destination of console output.
pub trait ConsoleSink {
    fn write(&mut self, level: ConsoleLevel, line: &str);
}

/// The default sink: stdout with the level prefix.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl ConsoleSink for StdoutSink {
    fn write(&mut self, level: ConsoleLevel, line: &str) {
        println!("[TS {}] {}", level.as_str(), line);
    }
}

/// A sink that records every line, for tests and embedders that surface
/// output themselves.
#[derive(Debug, Clone, Default)]
pub struct CaptureSink {
    lines: Rc<RefCell<Vec<(ConsoleLevel, String)>>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded `(level, line)` pairs so far.
    pub fn lines(&self) -> Vec<(ConsoleLevel, String)> {
        self.lines.borrow().clone()
    }

    /// Just the line bodies.
    pub fn texts(&self) -> Vec<String> {
        self.lines.borrow().iter().map(|(_, l)| l.clone()).collect()
    }
}

impl ConsoleSink for CaptureSink {
    fn write(&mut self, level: ConsoleLevel, line: &str) {
        self.lines.borrow_mut().push((level, line.to_owned()));
    }
}

pub(crate) fn console_output(
    rt: &mut Runtime,
    level: ConsoleLevel,
    args: &[Value],
) -> RtResult<Value> {
    let mut line = String::new();
    for arg in args {
        line.push_str(&rt.to_display(*arg)?);
    }
    rt.console_write(level, &line);
    Ok(Value::Undefined)
}

pub(crate) fn console_info(rt: &mut Runtime, _this: ObjRef, args: &[Value]) -> RtResult<Value> {
    console_output(rt, ConsoleLevel::Info, args)
}

pub(crate) fn console_log(rt: &mut Runtime, _this: ObjRef, args: &[Value]) -> RtResult<Value> {
    console_output(rt, ConsoleLevel::Log, args)
}

pub(crate) fn console_debug(rt: &mut Runtime, _this: ObjRef, args: &[Value]) -> RtResult<Value> {
    console_output(rt, ConsoleLevel::Debug, args)
}

pub(crate) fn console_warn(rt: &mut Runtime, _this: ObjRef, args: &[Value]) -> RtResult<Value> {
    console_output(rt, ConsoleLevel::Warn, args)
}

pub(crate) fn console_error(rt: &mut Runtime, _this: ObjRef, args: &[Value]) -> RtResult<Value> {
    console_output(rt, ConsoleLevel::Error, args)
}

pub(crate) fn console_trace(rt: &mut Runtime, _this: ObjRef, args: &[Value]) -> RtResult<Value> {
    console_output(rt, ConsoleLevel::Trace, args)
}

impl Runtime {
    /// Replaces the console sink.
    pub fn set_console_sink(&mut self, sink: Box<dyn ConsoleSink>) {
        self.console = sink;
    }

    pub(crate) fn console_write(&mut self, level: ConsoleLevel, line: &str) {
        self.console.write(level, line);
    }

    fn console_call(&mut self, member: u32, args: &[Value]) -> RtResult<Value> {
        let console = self.std_object(StdObject::Console)?;
        self.method_call(console, crate::object::vtable::METHOD_LAST + member, args)
    }

    /// `console.info(...)` through the std singleton.
    pub fn console_info(&mut self, args: &[Value]) -> RtResult<()> {
        self.console_call(0, args).map(|_| ())
    }

    /// `console.log(...)` through the std singleton.
    pub fn console_log(&mut self, args: &[Value]) -> RtResult<()> {
        self.console_call(1, args).map(|_| ())
    }

    /// `console.warn(...)` through the std singleton.
    pub fn console_warn(&mut self, args: &[Value]) -> RtResult<()> {
        self.console_call(3, args).map(|_| ())
    }

    /// `console.error(...)` through the std singleton.
    pub fn console_error(&mut self, args: &[Value]) -> RtResult<()> {
        self.console_call(4, args).map(|_| ())
    }
}
