//! Integration tests for exception propagation: the nested
//! try/catch/finally scenario, rethrow sequencing, scope-snapshot
//! unwinding, and the root-exception path.

mod common;

use std::rc::Rc;

use common::{closure_vtable, fixture, function_vtable};
use tsrun_runtime::error::RtResult;
use tsrun_runtime::heap::ObjRef;
use tsrun_runtime::object::vtable::VtableEnv;
use tsrun_runtime::runtime::Runtime;
use tsrun_runtime::value::{Value, ValueKind};

fn log_line(rt: &mut Runtime, line: impl Into<String>) -> RtResult<()> {
    let s = rt.new_string(line.into())?;
    rt.console_log(&[Value::Object(s)])?;
    rt.release(s);
    Ok(())
}

fn inner(rt: &mut Runtime) -> RtResult<()> {
    rt.try_catch_finally(
        |rt| {
            log_line(rt, "inner do")?;
            Err(rt.throw_error("inner fatal", file!(), line!()))
        },
        |rt, err| {
            let rendered = rt.to_display(Value::Object(err))?;
            log_line(rt, format!("inner caught: {rendered}"))?;
            Err(rt.throw_error("from inner", file!(), line!()))
        },
        |rt| log_line(rt, "inner finally"),
    )
}

fn outer(rt: &mut Runtime) -> RtResult<()> {
    rt.try_catch_finally(
        |rt| {
            log_line(rt, "outer do")?;
            inner(rt)
        },
        |rt, err| {
            let rendered = rt.to_display(Value::Object(err))?;
            log_line(rt, format!("outer catch: {rendered}"))
        },
        |rt| log_line(rt, "outer finally"),
    )
}

#[test]
fn test_nested_try_catch_finally_scenario() {
    let mut f = fixture();
    outer(&mut f.rt).unwrap();

    let lines = f.lines();
    assert_eq!(lines.len(), 6);
    assert_eq!(lines[0], "outer do");
    assert_eq!(lines[1], "inner do");
    assert!(
        lines[2].starts_with("inner caught: [TS Error] message:[inner fatal]"),
        "unexpected: {}",
        lines[2]
    );
    assert_eq!(lines[3], "inner finally");
    assert!(
        lines[4].starts_with("outer catch: [TS Error] message:[from inner]"),
        "unexpected: {}",
        lines[4]
    );
    assert_eq!(lines[5], "outer finally");

    // Fully handled: nothing in flight, nothing at top level.
    assert!(f.rt.exception().is_none());
    assert!(!f.rt.had_root_exception());
    assert_eq!(f.rt.try_depth(), 0);
}

#[test]
fn test_catch_handles_and_clears() {
    let mut f = fixture();
    f.rt.try_catch(
        |rt| Err(rt.throw_error("caught here", file!(), line!())),
        |rt, err| {
            let rendered = rt.to_display(Value::Object(err))?;
            log_line(rt, rendered)
        },
    )
    .unwrap();
    assert!(f.rt.exception().is_none());
    assert!(f.lines()[0].starts_with("[TS Error] message:[caught here]"));
}

#[test]
fn test_finally_runs_on_normal_exit() {
    let mut f = fixture();
    f.rt.try_finally(
        |rt| log_line(rt, "body"),
        |rt| log_line(rt, "cleanup"),
    )
    .unwrap();
    assert_eq!(f.lines(), vec!["body", "cleanup"]);
}

#[test]
fn test_uncaught_throw_propagates_through_finally() {
    let mut f = fixture();
    let result = f.rt.try_finally(
        |rt| Err(rt.throw_error("escapes", file!(), line!())),
        |rt| log_line(rt, "cleanup ran"),
    );
    assert!(result.is_err());
    assert_eq!(f.lines(), vec!["cleanup ran"]);
    // Still in flight for an enclosing handler.
    let exc = f.rt.take_exception().expect("exception in flight");
    f.rt.release(exc);
}

#[test]
fn test_scope_stack_collapses_to_snapshot() {
    let mut f = fixture();
    let depth_before = f.rt.heap().scope_depth();
    f.rt.try_catch(
        |rt| {
            // Grow the scope stack inside the try body, then throw out of
            // it; the handler must see the snapshot depth.
            rt.with_scope(2, |rt| {
                let s = rt.new_string("scoped")?;
                rt.set_local(0, Some(s));
                rt.with_scope(1, |rt| Err(rt.throw_error("unwind", file!(), line!())))
            })
        },
        |rt, _err| {
            assert_eq!(rt.heap().scope_depth(), 0);
            Ok(())
        },
    )
    .unwrap();
    assert_eq!(f.rt.heap().scope_depth(), depth_before);
}

fn throwing_callback(rt: &mut Runtime, _this: ObjRef, _args: &[Value]) -> RtResult<Value> {
    Err(rt.throw_error("timer exploded", file!(), line!()))
}

#[test]
fn test_uncaught_task_exception_reaches_root_sink() {
    let mut f = fixture();
    let env: Rc<VtableEnv> = Rc::new(VtableEnv::new(
        function_vtable("throwing_callback", throwing_callback, ValueKind::Void),
        None,
        None,
    ));
    let cb = f.rt.new_function(&env).unwrap();
    f.rt.set_timeout(cb, 50, &[]).unwrap();
    f.rt.release(cb);

    assert!(f.run());
    assert!(f.rt.had_root_exception());
    let lines = f.sink.lines();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].0, tsrun_runtime::console::ConsoleLevel::Error);
    assert!(
        lines[0].1.starts_with("Uncaught [TS Error] message:[timer exploded]"),
        "unexpected: {}",
        lines[0].1
    );
}

#[test]
fn test_error_object_carries_cause_chain() {
    let mut f = fixture();
    let cause = f.rt.new_error("root cause", None, "lib.ts", 3, 1).unwrap();
    let err = f.rt.new_error("wrapper", Some(cause), "app.ts", 9, 2).unwrap();
    let rendered = f.rt.to_display(Value::Object(err)).unwrap();
    assert!(rendered.starts_with("[TS Error] message:[wrapper] cause:[some]"));
    assert!(rendered.contains("\"app.ts\":9-2"));
    f.rt.release(cause);
    // The wrapper owns its cause now.
    let live_before = f.rt.heap_stats().live();
    f.rt.release(err);
    assert_eq!(f.rt.heap_stats().live(), live_before - 2);
}

// Closures that throw still run under a try block installed further up the
// native call stack.
fn capture_and_throw(rt: &mut Runtime, this: ObjRef, _args: &[Value]) -> RtResult<Value> {
    let what = match rt.closure_object(this, 0)? {
        Some(s) => rt.string_text(s)?,
        None => "unknown".to_owned(),
    };
    Err(rt.throw_error(what, file!(), line!()))
}

#[test]
fn test_throw_across_function_call_boundary() {
    let mut f = fixture();
    let env = Rc::new(VtableEnv::new(
        closure_vtable("capture_and_throw", capture_and_throw, ValueKind::Void, 1, 0),
        None,
        None,
    ));
    let what = f.rt.new_string_const("from closure").unwrap();
    let thrower = f.rt.new_closure(&env, vec![Some(what)], vec![]).unwrap();

    f.rt.try_catch(
        |rt| {
            rt.function_call(thrower, &[])?;
            log_line(rt, "unreachable")
        },
        |rt, err| {
            let rendered = rt.to_display(Value::Object(err))?;
            log_line(rt, format!("caught: {rendered}"))
        },
    )
    .unwrap();

    let lines = f.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("caught: [TS Error] message:[from closure]"));
    f.rt.release(thrower);
}
