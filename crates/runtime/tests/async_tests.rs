//! Integration tests for async-function awaiter frames: the await-loop
//! scenario, label-driven resumption, and completion of the awaiter promise.

mod common;

use common::{awaiter_vtable, closure_vtable, fixture, function_vtable, module_vtable};
use tsrun_runtime::error::RtResult;
use tsrun_runtime::heap::ObjRef;
use tsrun_runtime::runtime::Runtime;
use tsrun_runtime::value::{obj_arg, Value, ValueKind};
use tsrun_runtime::PromiseState;

// Module layout, mirroring the compiled shape of:
//
//   const resolver = (msg, timeout) => new Promise((resolve) => {
//       console.log(msg);
//       setTimeout(resolve, timeout);
//   });
//
//   async function run() {
//       let a = 1;
//       for (let i = 1; i <= 6; i++) { console.log("==" + i); await resolver(a++, 500); }
//       console.log("==7");
//   }
//
// classes: 0 = resolver executor (closure: msg, timeout)
//          1 = resolver           (plain function)
//          2 = run                (plain function)
//          3 = run awaiter        (awaiter frame: a)
// functions: 0 = resolver, 1 = run

const CLASS_RESOLVER_EXECUTOR: usize = 0;
const CLASS_RESOLVER: usize = 1;
const CLASS_RUN: usize = 2;
const CLASS_RUN_AWAITER: usize = 3;

const LABEL_BEGIN: u32 = 1;
const LABEL_END: u32 = 7;

// (resolve) => { console.log(msg); setTimeout(resolve, timeout); }
fn resolver_executor(rt: &mut Runtime, this: ObjRef, args: &[Value]) -> RtResult<Value> {
    let resolve = obj_arg(args, 0).expect("resolver argument");
    let msg = rt.closure_value(this, 0)?;
    let timeout = rt.closure_value(this, 1)?.to_int64(0);
    let line = rt.to_display(msg)?;
    let s = rt.new_string(line)?;
    rt.console_log(&[Value::Object(s)])?;
    rt.release(s);
    rt.set_timeout(resolve, timeout, &[])?;
    Ok(Value::Undefined)
}

// (msg, timeout) => new Promise(executor)
fn resolver_body(rt: &mut Runtime, this: ObjRef, args: &[Value]) -> RtResult<Value> {
    let module = rt.module_of(this)?.expect("module-bound function");
    let executor_env = rt.module_class(module, CLASS_RESOLVER_EXECUTOR)?;
    let msg = args.first().copied().unwrap_or(Value::Undefined);
    let timeout = args.get(1).copied().unwrap_or(Value::Undefined);
    let executor = rt.new_closure(&executor_env, vec![], vec![msg, timeout])?;
    let promise = rt.new_promise(Some(executor))?;
    rt.release(executor);
    Ok(Value::Object(promise))
}

// The async body, shared by the plain `run` class and its awaiter class.
fn run_body(rt: &mut Runtime, this: ObjRef, args: &[Value]) -> RtResult<Value> {
    if !rt.is_awaiter_function(this) {
        // First call: build the frame and hand back the awaiter promise.
        let module = rt.module_of(this)?.expect("module-bound function");
        let awaiter_env = rt.module_class(module, CLASS_RUN_AWAITER)?;
        let awaiter = rt.new_awaiter_function(&awaiter_env)?;
        rt.awaiter_set_label(awaiter, LABEL_BEGIN)?;
        let promise = rt.new_awaiter_promise(awaiter)?;
        rt.release(awaiter);
        return Ok(Value::Object(promise));
    }

    let Some(label) = rt.awaiter_label(this)? else {
        return Ok(Value::Undefined);
    };

    if label == LABEL_BEGIN {
        // let a = 1; and remember our own promise for the await links.
        rt.awaiter_bind_promise(this, args.first().copied().unwrap_or(Value::Undefined))?;
        rt.set_awaiter_value(this, 0, Value::Int32(1))?;
    }

    let banner = rt.new_string(format!("=={label}"))?;
    rt.console_log(&[Value::Object(banner)])?;
    rt.release(banner);

    if label == LABEL_END {
        rt.awaiter_finish(this)?;
        return Ok(Value::Undefined);
    }

    // await resolver(a++, 500);
    let module = rt.module_of(this)?.expect("module-bound function");
    let a = rt.awaiter_value(this, 0)?;
    let ret = rt.module_call_function(module, 0, &[a, Value::Int64(500)])?;
    rt.set_awaiter_value(this, 0, Value::Int32(a.to_int64(0) as i32 + 1))?;
    let awaited = ret.as_object().expect("resolver returns a promise");
    rt.awaiter_await(this, awaited, label + 1)?;
    rt.release(awaited);
    Ok(Value::Undefined)
}

fn async_module_init(rt: &mut Runtime, this: ObjRef, _args: &[Value]) -> RtResult<Value> {
    let promise = rt.module_call_function(this, 1, &[])?;
    if let Some(p) = promise.as_object() {
        rt.release(p);
    }
    Ok(Value::Undefined)
}

fn build_async_module(rt: &mut Runtime) -> ObjRef {
    let vt = module_vtable("test_async_await", async_module_init, 0, 2, 4, 0);
    let module = rt.new_module(&vt).unwrap();
    rt.module_set_class(
        module,
        CLASS_RESOLVER_EXECUTOR,
        &closure_vtable("resolver_executor", resolver_executor, ValueKind::Void, 0, 2),
        None,
    )
    .unwrap();
    rt.module_set_class(
        module,
        CLASS_RESOLVER,
        &function_vtable("resolver", resolver_body, ValueKind::Object),
        None,
    )
    .unwrap();
    rt.module_set_class(
        module,
        CLASS_RUN,
        &function_vtable("run", run_body, ValueKind::Object),
        None,
    )
    .unwrap();
    rt.module_set_class(
        module,
        CLASS_RUN_AWAITER,
        &awaiter_vtable("run_awaiter", run_body, 0, 1),
        None,
    )
    .unwrap();
    rt.module_new_function(module, 0, CLASS_RESOLVER).unwrap();
    rt.module_new_function(module, 1, CLASS_RUN).unwrap();
    module
}

#[test]
fn test_async_await_counter_scenario() {
    let mut f = fixture();
    let module = build_async_module(&mut f.rt);
    let root = f.rt.make_strong(module);

    f.rt.module_initialize(module).unwrap();
    assert!(f.run());

    let expected = vec![
        "==1", "1", "==2", "2", "==3", "3", "==4", "4", "==5", "5", "==6", "6", "==7",
    ];
    assert_eq!(f.lines(), expected);
    // Six awaited resolvers, 500 ms apart.
    assert_eq!(f.backend.clock_ms(), 3000);
    assert!(!f.rt.had_root_exception());

    f.rt.strong_release(root);
    f.rt.release(module);
}

#[test]
fn test_awaiter_promise_settles_once_finished() {
    let mut f = fixture();
    let module = build_async_module(&mut f.rt);
    let root = f.rt.make_strong(module);

    // Call run() directly and observe its promise.
    let ret = f.rt.module_call_function(module, 1, &[]).unwrap();
    let promise = ret.as_object().expect("run returns a promise");
    assert!(f.rt.is_promise(promise));
    assert_eq!(f.rt.promise_state(promise).unwrap(), PromiseState::Pending);

    assert!(f.run());
    // Finished: the body reported the end label and the promise stays
    // settled.
    assert_eq!(f.rt.promise_state(promise).unwrap(), PromiseState::Fulfilled);

    f.rt.release(promise);
    f.rt.strong_release(root);
    f.rt.release(module);
}
