//! Integration tests for the heap: reference counting, weak references,
//! local scopes, and cycle collection.

mod common;

use common::fixture;
use tsrun_runtime::object::vtable::METHOD_LAST;
use tsrun_runtime::value::Value;

#[test]
fn test_live_object_has_positive_ref_count() {
    let mut f = fixture();
    let s = f.rt.new_string("alive").unwrap();
    assert_eq!(f.rt.ref_count(s), 1);
    f.rt.add_ref(s);
    assert_eq!(f.rt.ref_count(s), 2);
    f.rt.release(s);
    assert_eq!(f.rt.ref_count(s), 1);
    f.rt.release(s);
}

#[test]
fn test_release_to_zero_destroys() {
    let mut f = fixture();
    let before = f.rt.heap_stats().live();
    let s = f.rt.new_string("transient").unwrap();
    assert_eq!(f.rt.heap_stats().live(), before + 1);
    f.rt.release(s);
    assert_eq!(f.rt.heap_stats().live(), before);
    // The handle is stale now; lookups refuse it.
    assert_eq!(f.rt.ref_count(s), 0);
    assert!(f.rt.string_text(s).is_err());
}

#[test]
fn test_slot_reuse_after_release() {
    let mut f = fixture();
    let a = f.rt.new_int32(1).unwrap();
    f.rt.release(a);
    let b = f.rt.new_int32(2).unwrap();
    // The freed slot is at the head of its free list.
    assert_eq!(a, b);
    assert_eq!(f.rt.object_to_int(b, 0), 2);
    f.rt.release(b);
}

#[test]
fn test_weak_reference_does_not_prolong_life() {
    let mut f = fixture();
    let s = f.rt.new_string("referent").unwrap();
    let w = f.rt.make_weak(s).unwrap();
    assert_eq!(f.rt.weak_get(w), Some(s));
    // One strong reference; the weak entry adds nothing.
    assert_eq!(f.rt.ref_count(s), 1);
    f.rt.release(s);
    // Cleared synchronously when the referent died.
    assert_eq!(f.rt.weak_get(w), None);
}

#[test]
fn test_weak_entries_are_deduplicated() {
    let mut f = fixture();
    let s = f.rt.new_string("referent").unwrap();
    let before = f.rt.heap_stats().weak_entries;
    let w1 = f.rt.make_weak(s).unwrap();
    let w2 = f.rt.make_weak(s).unwrap();
    assert_eq!(f.rt.heap_stats().weak_entries, before + 1);
    f.rt.weak_release(w1);
    // Still one outstanding weak reference; the entry survives.
    assert_eq!(f.rt.weak_get(w2), Some(s));
    f.rt.weak_release(w2);
    assert_eq!(f.rt.heap_stats().weak_entries, before);
    f.rt.release(s);
}

#[test]
fn test_scope_roots_survive_collection() {
    let mut f = fixture();
    let baseline = f.rt.heap_stats().live();
    f.rt.with_scope(1, |rt| {
        let s = rt.new_string("rooted").unwrap();
        rt.set_local(0, Some(s));
        rt.collect_garbage();
        // Rooted through the scope: still alive.
        assert_eq!(rt.string_text(s).unwrap(), "rooted");
        Ok(())
    })
    .unwrap();
    // Scope popped; the object is unreachable and swept.
    f.rt.collect_garbage();
    assert_eq!(f.rt.heap_stats().live(), baseline);
}

#[test]
fn test_cycle_reclaimed_only_by_collection() {
    let mut f = fixture();

    fn pair_ctor(
        _rt: &mut tsrun_runtime::runtime::Runtime,
        _this: tsrun_runtime::heap::ObjRef,
        _args: &[Value],
    ) -> tsrun_runtime::error::RtResult<Value> {
        Ok(Value::Undefined)
    }
    let vtable = std::rc::Rc::new(tsrun_runtime::object::vtable::Vtable {
        name: "Pair",
        super_class: None,
        object_size: tsrun_runtime::object::vtable::object_size_for_fields(1),
        base_type: tsrun_runtime::object::vtable::BaseType::Object,
        return_kind: tsrun_runtime::value::ValueKind::Void,
        data: tsrun_runtime::object::vtable::DataKind::Fields(1),
        interfaces: Vec::new(),
        constructor: Some(pair_ctor),
        to_string: None,
        members: vec![tsrun_runtime::object::vtable::Member::Field(0)],
    });
    let venv = std::rc::Rc::new(tsrun_runtime::object::vtable::VtableEnv::new(
        vtable, None, None,
    ));

    let baseline = f.rt.heap_stats().live();
    let a = f.rt.new_object(&venv, &[]).unwrap();
    let b = f.rt.new_object(&venv, &[]).unwrap();
    // a.partner = b, b.partner = a; both counts transfer into the cycle.
    f.rt.set_field(a, METHOD_LAST, Value::Object(b)).unwrap();
    f.rt.set_field(b, METHOD_LAST, Value::Object(a)).unwrap();
    assert_eq!(f.rt.heap_stats().live(), baseline + 2);

    // Reference counting alone cannot reclaim the cycle.
    assert_eq!(f.rt.ref_count(a), 1);
    assert_eq!(f.rt.ref_count(b), 1);

    let swept = f.rt.collect_garbage();
    assert!(swept >= 2);
    assert_eq!(f.rt.heap_stats().live(), baseline);
}

#[test]
fn test_marks_clear_outside_collection_window() {
    let mut f = fixture();
    let s = f.rt.new_string("checked").unwrap();
    f.rt.with_scope(1, |rt| {
        rt.set_local(0, Some(s));
        rt.collect_garbage();
        assert!(!rt.heap().is_marked(s));
        Ok(())
    })
    .unwrap();
    f.rt.release(s);
}

#[test]
fn test_large_allocation_roundtrip() {
    let mut f = fixture();
    // Far past the largest size class: lands in the large-object table.
    let text = "x".repeat(16 * 1024);
    let before = f.rt.heap_stats().live_large;
    let s = f.rt.new_string(text.clone()).unwrap();
    assert_eq!(f.rt.heap_stats().live_large, before + 1);
    assert_eq!(f.rt.string_text(s).unwrap(), text);
    f.rt.release(s);
    assert_eq!(f.rt.heap_stats().live_large, before);
}

#[test]
fn test_collection_keeps_std_module_alive() {
    let mut f = fixture();
    f.rt.collect_garbage();
    // The console singleton still works after a full sweep.
    f.rt.console_info(&[Value::Int32(7)]).unwrap();
    assert_eq!(f.lines(), vec!["7".to_owned()]);
}
