//! Integration tests for external and script-initiated resets.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{Behavior, Harness, request};
use script_engine::model::{EventRecord, ExecutionState, Value};
use script_engine::queue::Enqueue;
use script_engine::script::EventMask;
use script_engine::state::StateStore;

#[test]
fn reset_script_starts_over_in_default() {
    let h = Harness::new();
    let script = h
        .script()
        .on("touch", Behavior::SetVar("counter".to_string(), Value::from(9)));
    let inst = h.load(request(), script);
    inst.post_event(EventRecord::new("touch"));
    inst.set_state("open");
    h.pool.run_all();
    inst.save_state().unwrap();

    inst.post_event(EventRecord::new("stale"));
    let removals = h.plugins.removals.load(Ordering::SeqCst);
    inst.reset_script();

    assert_eq!(inst.state(), "default");
    assert_eq!(inst.vars().get("counter"), Some(&Value::Integer(0)));
    assert!(inst.is_running());
    assert!(!h.store.exists(inst.item_id()));
    assert_eq!(*h.world.permission_resets.lock().unwrap(), vec![inst.item_id()]);
    assert_eq!(h.plugins.removals.load(Ordering::SeqCst), removals + 1);
    assert_eq!(
        h.world.masks.lock().unwrap().last(),
        Some(&(inst.item_id(), EventMask(7)))
    );

    let names: Vec<String> = inst.queued_events().iter().map(|e| e.name().to_string()).collect();
    assert_eq!(names, ["state_entry"]);

    let before = h.log.entries().len();
    h.pool.run_all();
    assert_eq!(&h.log.entries()[before..], ["default:state_entry"]);
}

#[test]
fn reset_script_on_stopped_instance_stays_stopped() {
    let h = Harness::new();
    let inst = h.load(request(), h.script());
    h.pool.run_all();
    inst.stop(Duration::ZERO);

    inst.reset_script();
    assert!(!inst.is_running());
    assert_eq!(inst.execution_state(), ExecutionState::Stopped);
    assert_eq!(inst.queue_len(), 0);
    assert_eq!(inst.post_event(EventRecord::new("touch")), Enqueue::NotRunning);
}

#[test]
fn reset_script_aborts_running_event() {
    let h = Harness::new();
    let (spin, _release, entered, interrupted) = common::spin();
    let inst = h.load(request(), h.script().on("touch", spin));
    h.pool.run_all();

    inst.post_event(EventRecord::new("touch"));
    let pool = h.pool.clone();
    let worker = std::thread::spawn(move || pool.run_next());
    assert!(common::wait_until(|| entered.load(Ordering::SeqCst)));

    inst.reset_script();
    worker.join().unwrap();
    assert!(interrupted.load(Ordering::SeqCst));
    assert_eq!(inst.state(), "default");

    h.pool.run_all();
    assert_eq!(h.log.entries().last().map(String::as_str), Some("default:state_entry"));
    assert_eq!(inst.execution_state(), ExecutionState::Idle);
}

#[test]
fn api_reset_keeps_pending_events() {
    let h = Harness::new();
    let script = h
        .script()
        .on("bump", Behavior::SetVar("counter".to_string(), Value::from(4)))
        .on("touch", Behavior::Reset);
    let inst = h.load(request(), script);
    inst.post_event(EventRecord::new("bump"));
    inst.post_event(EventRecord::new("touch"));
    inst.post_event(EventRecord::new("other"));
    h.pool.run_all();

    assert_eq!(
        h.log.entries(),
        vec![
            "default:state_entry",
            "default:bump",
            "default:touch",
            "default:other",
            "default:state_entry"
        ]
    );
    assert_eq!(inst.vars().get("counter"), Some(&Value::Integer(0)));
    assert_eq!(*h.world.permission_resets.lock().unwrap(), vec![inst.item_id()]);
    assert!(inst.is_running());
}

#[test]
fn api_reset_from_state_entry_does_not_loop() {
    let h = Harness::new();
    let script = h.script().on("state_entry", Behavior::Reset);
    let inst = h.load(request(), script);

    h.pool.run_all();
    assert_eq!(h.log.entries(), vec!["default:state_entry"]);
    assert_eq!(inst.queue_len(), 0);
}

#[test]
fn api_reset_returns_to_default_state() {
    let h = Harness::new();
    let script = h.script().on("touch", Behavior::Reset);
    let inst = h.load(request(), script);
    inst.set_state("open");
    h.pool.run_all();
    assert_eq!(inst.state(), "open");

    inst.post_event(EventRecord::new("touch"));
    h.pool.run_all();
    assert_eq!(inst.state(), "default");
    assert_eq!(h.log.entries().last().map(String::as_str), Some("default:state_entry"));
}
