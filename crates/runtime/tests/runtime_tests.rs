//! Integration tests for the runtime aggregate: the hello scenario, module
//! lifecycle, static rooting, and the drained-to-empty exit disposition.

mod common;

use common::{fixture, function_vtable, module_vtable};
use tsrun_runtime::console::ConsoleLevel;
use tsrun_runtime::error::RtResult;
use tsrun_runtime::heap::ObjRef;
use tsrun_runtime::runtime::Runtime;
use tsrun_runtime::value::{Value, ValueKind};

fn hello_init(rt: &mut Runtime, _this: ObjRef, _args: &[Value]) -> RtResult<Value> {
    let s = rt.new_string_const("hello world")?;
    rt.console_info(&[Value::Object(s)])?;
    rt.release(s);
    Ok(Value::Undefined)
}

#[test]
fn test_hello_scenario() {
    let mut f = fixture();
    let vt = module_vtable("hello", hello_init, 0, 0, 0, 0);
    let module = f.rt.new_module(&vt).unwrap();

    f.rt.module_initialize(module).unwrap();
    let drained = f.run();

    // Exit code 0 analog: drained to empty with no uncaught exception.
    assert!(drained);
    assert!(!f.rt.had_root_exception());
    assert_eq!(
        f.sink.lines(),
        vec![(ConsoleLevel::Info, "hello world".to_owned())]
    );
    f.rt.release(module);
}

fn greet_body(rt: &mut Runtime, this: ObjRef, _args: &[Value]) -> RtResult<Value> {
    let module = rt.module_of(this)?.expect("module-bound function");
    let greeting = rt.module_value(module, 0)?;
    rt.console_log(&[greeting])?;
    Ok(Value::Undefined)
}

fn greeter_init(rt: &mut Runtime, this: ObjRef, _args: &[Value]) -> RtResult<Value> {
    let s = rt.new_string_const("stored greeting")?;
    rt.module_set_value(this, 0, Value::Object(s))?;
    rt.module_call_function(this, 0, &[])?;
    Ok(Value::Undefined)
}

#[test]
fn test_module_statics_and_functions() {
    let mut f = fixture();
    let vt = module_vtable("greeter", greeter_init, 1, 1, 1, 0);
    let module = f.rt.new_module(&vt).unwrap();
    f.rt.module_set_class(
        module,
        0,
        &function_vtable("greet", greet_body, ValueKind::Void),
        None,
    )
    .unwrap();
    let func = f.rt.module_new_function(module, 0, 0).unwrap();

    f.rt.module_initialize(module).unwrap();
    assert_eq!(f.lines(), vec!["stored greeting"]);

    // The function singleton resolves back to its defining module.
    assert_eq!(f.rt.module_of(func).unwrap(), Some(module));
    assert_eq!(f.rt.module_function(module, 0).unwrap(), func);

    // The module roots its statics across a collection.
    let root = f.rt.make_strong(module);
    f.rt.collect_garbage();
    f.rt.module_call_function(module, 0, &[]).unwrap();
    assert_eq!(f.lines(), vec!["stored greeting", "stored greeting"]);

    // Dropping the root and the creator reference releases the whole unit:
    // module, function singleton, and stored string.
    let live_before = f.rt.heap_stats().live();
    f.rt.strong_release(root);
    f.rt.release(module);
    assert_eq!(f.rt.heap_stats().live(), live_before - 3);
}

#[test]
fn test_unrooted_module_is_swept() {
    let mut f = fixture();
    let vt = module_vtable("ephemeral", hello_init, 0, 0, 0, 0);
    let module = f.rt.new_module(&vt).unwrap();
    let live_before = f.rt.heap_stats().live();

    // The creator's count keeps it alive through the refcount path, but
    // nothing roots it: a collection reclaims it regardless.
    assert_eq!(f.rt.ref_count(module), 1);
    let swept = f.rt.collect_garbage();
    assert!(swept >= 1);
    assert_eq!(f.rt.heap_stats().live(), live_before - 1);
}

#[test]
fn test_std_singletons_are_reachable() {
    let f = fixture();
    let std_module = f.rt.std_module();
    let console = f
        .rt
        .std_object(tsrun_runtime::runtime::StdObject::Console)
        .unwrap();
    let timer = f
        .rt
        .std_object(tsrun_runtime::runtime::StdObject::Timer)
        .unwrap();
    assert_ne!(console, timer);
    assert_eq!(f.rt.module_of(console).unwrap(), Some(std_module));
    assert_eq!(f.rt.module_of(timer).unwrap(), Some(std_module));
}

#[test]
fn test_drain_reports_failure_disposition() {
    let mut f = fixture();

    fn failing_init(rt: &mut Runtime, _this: ObjRef, _args: &[Value]) -> RtResult<Value> {
        Err(rt.throw_error("init failed", file!(), line!()))
    }
    let vt = module_vtable("failing", failing_init, 0, 0, 0, 0);
    let module = f.rt.new_module(&vt).unwrap();

    // Initialization throws with no handler: the embedder surfaces it.
    let result = f.rt.module_initialize(module);
    assert!(result.is_err());
    if let Some(exc) = f.rt.take_exception() {
        f.rt.report_uncaught(exc);
    }
    assert!(f.rt.had_root_exception());
    f.rt.release(module);
}
