//! The timer service.
//!
//! The std module's timer singleton keeps its pending nodes ordered by
//! `(deadline, id)`; the monotonically increasing id preserves insertion
//! order among same-deadline timers. Arming a timer pushes the backend's
//! next deadline; firing pops the minimum due node, invokes its callback
//! with the captured argument tuple, then either rearms (interval) or frees
//! the node. Clearing tolerates both a not-yet-fired node (immediate
//! removal) and a clear from inside the node's own callback (deferred
//! through the firing flags).

use std::collections::BTreeMap;

use hashbrown::HashMap;

use crate::error::RtResult;
use crate::heap::ObjRef;
use crate::object::ObjData;
use crate::runtime::{Runtime, StdObject};
use crate::value::{int_arg, obj_arg, Value};

/// One scheduled timer.
#[derive(Debug)]
pub struct TimerNode {
    pub id: u64,
    pub deadline: u64,
    /// Repeat interval in milliseconds; 0 means one-shot.
    pub repeat: u64,
    pub callback: ObjRef,
    pub args: Vec<Value>,
}

#[derive(Debug)]
struct FiringState {
    id: u64,
    cleared: bool,
}

/// The pending-node store of the timer singleton.
#[derive(Debug, Default)]
pub struct TimerService {
    nodes: BTreeMap<(u64, u64), TimerNode>,
    deadlines: HashMap<u64, u64>,
    next_id: u64,
    firing: Option<FiringState>,
}

impl TimerService {
    pub fn new() -> Self {
        TimerService {
            nodes: BTreeMap::new(),
            deadlines: HashMap::new(),
            next_id: 0,
            firing: None,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert(&mut self, node: TimerNode) {
        self.deadlines.insert(node.id, node.deadline);
        self.nodes.insert((node.deadline, node.id), node);
    }

    /// The earliest pending deadline.
    pub fn min_deadline(&self) -> Option<u64> {
        self.nodes.keys().next().map(|&(deadline, _)| deadline)
    }

    /// Pops the minimum node if its deadline has elapsed, marking it as
    /// firing so a clear from inside the callback is deferred.
    fn pop_due(&mut self, now: u64) -> Option<TimerNode> {
        let &(deadline, id) = self.nodes.keys().next()?;
        if deadline > now {
            return None;
        }
        let node = self.nodes.remove(&(deadline, id))?;
        self.deadlines.remove(&id);
        self.firing = Some(FiringState { id, cleared: false });
        Some(node)
    }

    /// Ends the firing window; returns true if the node was cleared from
    /// inside its own callback.
    fn finish_fire(&mut self, id: u64) -> bool {
        match self.firing.take() {
            Some(state) if state.id == id => state.cleared,
            _ => false,
        }
    }

    /// Removes a node by handle. Returns the node when it was still pending;
    /// None if it was unknown, already gone, or deferred because it is
    /// currently firing.
    fn clear(&mut self, id: u64) -> Option<TimerNode> {
        if let Some(state) = self.firing.as_mut() {
            if state.id == id {
                state.cleared = true;
                return None;
            }
        }
        let deadline = self.deadlines.remove(&id)?;
        self.nodes.remove(&(deadline, id))
    }

    pub(crate) fn push_owned_refs(&self, out: &mut Vec<ObjRef>) {
        for node in self.nodes.values() {
            out.push(node.callback);
            out.extend(node.args.iter().filter_map(Value::as_object));
        }
    }
}

// ---------------------------------------------------------------------
// std timer members

fn timer_add(rt: &mut Runtime, this: ObjRef, repeat: bool, args: &[Value]) -> RtResult<Value> {
    let callback = obj_arg(args, 0).ok_or(crate::error::RuntimeError::NullObject {
        operation: "setTimeout",
    })?;
    let delay = int_arg(args, 1, 0).max(0) as u64;
    let extra: Vec<Value> = args.get(2..).unwrap_or(&[]).to_vec();

    // The node owns its callback and captured objects.
    rt.add_ref(callback);
    for obj in extra.iter().filter_map(Value::as_object) {
        rt.add_ref(obj);
    }

    let now = rt.backend.now_ms();
    let deadline = now.saturating_add(delay);
    let id = {
        let timer = rt.timer_mut(this)?;
        let id = timer.next_id();
        timer.insert(TimerNode {
            id,
            deadline,
            repeat: if repeat { delay } else { 0 },
            callback,
            args: extra,
        });
        id
    };
    rt.backend.set_next_deadline(deadline);
    log::trace!("timer {id} armed for {deadline}ms (repeat={repeat})");
    Ok(Value::Int64(id as i64))
}

fn timer_clear(rt: &mut Runtime, this: ObjRef, args: &[Value]) -> RtResult<Value> {
    let id = int_arg(args, 0, 0);
    if id <= 0 {
        return Ok(Value::Undefined);
    }
    let removed = rt.timer_mut(this)?.clear(id as u64);
    if let Some(node) = removed {
        rt.release_timer_node(node);
    }
    Ok(Value::Undefined)
}

pub(crate) fn timer_set_timeout(rt: &mut Runtime, this: ObjRef, args: &[Value]) -> RtResult<Value> {
    timer_add(rt, this, false, args)
}

pub(crate) fn timer_clear_timeout(
    rt: &mut Runtime,
    this: ObjRef,
    args: &[Value],
) -> RtResult<Value> {
    timer_clear(rt, this, args)
}

pub(crate) fn timer_set_interval(
    rt: &mut Runtime,
    this: ObjRef,
    args: &[Value],
) -> RtResult<Value> {
    timer_add(rt, this, true, args)
}

pub(crate) fn timer_clear_interval(
    rt: &mut Runtime,
    this: ObjRef,
    args: &[Value],
) -> RtResult<Value> {
    timer_clear(rt, this, args)
}

impl Runtime {
    pub(crate) fn timer_mut(&mut self, obj: ObjRef) -> RtResult<&mut TimerService> {
        let err = self.payload_mismatch(obj, "timer");
        match &mut self.heap.get_mut(obj)?.data {
            ObjData::Timer(t) => Ok(t),
            _ => Err(err),
        }
    }

    fn release_timer_node(&mut self, node: TimerNode) {
        self.release(node.callback);
        for obj in node.args.iter().filter_map(Value::as_object) {
            self.release(obj);
        }
    }

    fn timer_call(&mut self, member: u32, args: &[Value]) -> RtResult<Value> {
        let timer = self.std_object(StdObject::Timer)?;
        self.method_call(timer, crate::object::vtable::METHOD_LAST + member, args)
    }

    /// `setTimeout(callback, delay, ...extra)`; returns the timer handle.
    pub fn set_timeout(&mut self, callback: ObjRef, delay_ms: i64, extra: &[Value]) -> RtResult<i64> {
        let mut args = vec![Value::Object(callback), Value::Int64(delay_ms)];
        args.extend_from_slice(extra);
        Ok(self.timer_call(0, &args)?.to_int64(0))
    }

    /// `clearTimeout(handle)`.
    pub fn clear_timeout(&mut self, handle: i64) -> RtResult<()> {
        self.timer_call(1, &[Value::Int64(handle)]).map(|_| ())
    }

    /// `setInterval(callback, delay, ...extra)`; returns the timer handle.
    pub fn set_interval(
        &mut self,
        callback: ObjRef,
        delay_ms: i64,
        extra: &[Value],
    ) -> RtResult<i64> {
        let mut args = vec![Value::Object(callback), Value::Int64(delay_ms)];
        args.extend_from_slice(extra);
        Ok(self.timer_call(2, &args)?.to_int64(0))
    }

    /// `clearInterval(handle)`.
    pub fn clear_interval(&mut self, handle: i64) -> RtResult<()> {
        self.timer_call(3, &[Value::Int64(handle)]).map(|_| ())
    }

    /// Backend entry point: a requested deadline elapsed. Pops and fires at
    /// most one due node, rearms interval nodes, then pushes the next
    /// deadline. The backend wakes again immediately while due nodes remain.
    pub fn on_timeout(&mut self, now_ms: u64) {
        let Ok(timer_obj) = self.std_object(StdObject::Timer) else {
            return;
        };
        let node = match self.timer_mut(timer_obj) {
            Ok(timer) => timer.pop_due(now_ms),
            Err(_) => None,
        };
        let Some(node) = node else {
            return;
        };

        log::trace!("timer {} fired at {now_ms}ms", node.id);
        if let Err(err) = self.function_call(node.callback, &node.args) {
            self.handle_task_error(err);
        }

        let cleared = self
            .timer_mut(timer_obj)
            .map(|t| t.finish_fire(node.id))
            .unwrap_or(false);
        if node.repeat > 0 && !cleared {
            let deadline = self.backend.now_ms().saturating_add(node.repeat);
            let rearmed = TimerNode {
                deadline,
                ..node
            };
            if let Ok(timer) = self.timer_mut(timer_obj) {
                timer.insert(rearmed);
            }
        } else {
            self.release_timer_node(node);
        }

        let next = self
            .timer_mut(timer_obj)
            .ok()
            .and_then(|t| t.min_deadline());
        if let Some(deadline) = next {
            self.backend.set_next_deadline(deadline);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::SlotAddr;

    fn node(id: u64, deadline: u64) -> TimerNode {
        TimerNode {
            id,
            deadline,
            repeat: 0,
            callback: ObjRef(SlotAddr::Large { id: id as u32 }),
            args: Vec::new(),
        }
    }

    #[test]
    fn test_deadline_then_id_order() {
        let mut service = TimerService::new();
        service.insert(node(2, 100));
        service.insert(node(1, 100));
        service.insert(node(3, 50));
        assert_eq!(service.min_deadline(), Some(50));
        assert_eq!(service.pop_due(100).unwrap().id, 3);
        service.finish_fire(3);
        assert_eq!(service.pop_due(100).unwrap().id, 1);
        service.finish_fire(1);
        assert_eq!(service.pop_due(100).unwrap().id, 2);
    }

    #[test]
    fn test_pop_due_respects_deadline() {
        let mut service = TimerService::new();
        service.insert(node(1, 500));
        assert!(service.pop_due(499).is_none());
        assert!(service.pop_due(500).is_some());
    }

    #[test]
    fn test_clear_during_fire_is_deferred() {
        let mut service = TimerService::new();
        service.insert(node(1, 10));
        let fired = service.pop_due(10).unwrap();
        // The node is out of the store; clearing it now only flags it.
        assert!(service.clear(fired.id).is_none());
        assert!(service.finish_fire(fired.id));
    }
}
