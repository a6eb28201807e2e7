// SPDX-License-Identifier: MIT OR Apache-2.0
//! Worker contract and routing behaviour of a running engine.

use logpipe_core::{Event, PauseRequest, PipeStep, Pipeline, Processor, ProcessorError};
use logpipe_engine::{Engine, EngineError, MemoryTestSink};
use logpipe_telemetry::names;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const IDLE: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn set(name: &str, field: &'static str, value: i64) -> Processor {
    Processor::transform(name, move |ev: &mut Event| -> Result<bool, ProcessorError> {
        ev.put(field, value);
        Ok(true)
    })
}

fn counting(name: &str, counter: &Arc<AtomicUsize>) -> Processor {
    let counter = Arc::clone(counter);
    Processor::transform(name, move |_: &mut Event| -> Result<bool, ProcessorError> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    })
}

fn failing(name: &str, error: fn() -> ProcessorError) -> Processor {
    Processor::transform(name, move |_: &mut Event| -> Result<bool, ProcessorError> {
        Err(error())
    })
}

fn event(value: serde_json::Value) -> Event {
    Event::from_json(value).unwrap()
}

// ===========================================================================
// 1. Happy path and continuations
// ===========================================================================

#[test]
fn event_runs_through_pipeline_to_output() {
    let pipeline = Pipeline::new("main")
        .processor(set("a", "a", 1))
        .processor(set("b", "b", 2));
    let engine = Engine::builder()
        .pipeline(pipeline)
        .output("main", 4)
        .start()
        .unwrap();
    engine.submit("main", event(json!({"msg": "hi"}))).unwrap();
    assert!(engine.wait_idle(IDLE));

    let out = engine.output("main").unwrap().try_recv().unwrap();
    assert_eq!(out.data(), &json!({"msg": "hi", "a": 1, "b": 2}).as_object().unwrap().clone());
    assert_eq!(out.steps(), 2);
    assert_eq!(engine.metrics().counter_value(&names::inflight("main")), 0);
    assert_eq!(engine.metrics().timer_count(&names::timer("main")), 1);
    engine.shutdown();
}

#[test]
fn success_continuation_runs_before_remaining_steps() {
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let record = |name: &'static str| {
        let order = Arc::clone(&order);
        Processor::transform(name, move |_: &mut Event| -> Result<bool, ProcessorError> {
            order.lock().unwrap().push(name);
            Ok(true)
        })
    };
    let pipeline = Pipeline::new("main")
        .processor(record("first").on_success(record("continuation")))
        .processor(record("second"));
    let engine = Engine::builder()
        .pipeline(pipeline)
        .output("main", 4)
        .workers(1)
        .start()
        .unwrap();
    engine.submit("main", Event::empty()).unwrap();
    assert!(engine.wait_idle(IDLE));
    assert_eq!(*order.lock().unwrap(), ["first", "continuation", "second"]);
}

#[test]
fn declined_guard_takes_failure_branch() {
    struct Never;
    impl logpipe_core::Transform for Never {
        fn is_process_needed(&self, _: &Event) -> bool {
            false
        }
        fn process(&self, _: &mut Event) -> Result<bool, ProcessorError> {
            panic!("guard declined");
        }
    }
    let pipeline = Pipeline::new("main").processor(
        Processor::transform("never", Never)
            .on_success(set("yes", "branch", 1))
            .on_failure(set("no", "branch", 0)),
    );
    let engine = Engine::builder()
        .pipeline(pipeline)
        .output("main", 4)
        .start()
        .unwrap();
    engine.submit("main", Event::empty()).unwrap();
    assert!(engine.wait_idle(IDLE));
    let out = engine.output("main").unwrap().try_recv().unwrap();
    assert_eq!(out.get("branch"), Some(&json!(0)));
}

#[test]
fn ignore_continues_without_continuations() {
    let pipeline = Pipeline::new("main")
        .processor(failing("skip", || ProcessorError::Ignore).on_success(set("s", "s", 1)))
        .processor(set("after", "after", 1));
    let engine = Engine::builder()
        .pipeline(pipeline)
        .output("main", 4)
        .start()
        .unwrap();
    engine.submit("main", Event::empty()).unwrap();
    assert!(engine.wait_idle(IDLE));
    let out = engine.output("main").unwrap().try_recv().unwrap();
    assert!(!out.contains_key("s"));
    assert_eq!(out.get("after"), Some(&json!(1)));
}

// ===========================================================================
// 2. Drops and failures
// ===========================================================================

#[test]
fn drop_processor_discards_and_marks() {
    let pipeline = Pipeline::new("main")
        .processor(Processor::drop_event("drop"))
        .processor(set("never", "x", 1));
    let engine = Engine::builder()
        .pipeline(pipeline)
        .output("main", 4)
        .start()
        .unwrap();
    engine.submit("main", Event::empty()).unwrap();
    assert!(engine.wait_idle(IDLE));
    let metrics = engine.metrics();
    assert_eq!(metrics.meter_count(names::ALL_DROPPED), 1);
    assert_eq!(metrics.meter_count(&names::dropped("main")), 1);
    assert!(engine.output("main").unwrap().is_empty());
}

#[test]
fn discard_error_is_a_drop() {
    let pipeline = Pipeline::new("main").processor(failing("d", || ProcessorError::Discard));
    let engine = Engine::builder()
        .pipeline(pipeline)
        .output("main", 4)
        .start()
        .unwrap();
    engine.submit("main", Event::empty()).unwrap();
    assert!(engine.wait_idle(IDLE));
    assert_eq!(engine.metrics().meter_count(names::ALL_DROPPED), 1);
}

#[test]
fn processing_error_uses_exception_continuation() {
    let pipeline = Pipeline::new("main").processor(
        failing("bad", || ProcessorError::processing("nope")).on_exception(set("rescue", "rescued", 1)),
    );
    let engine = Engine::builder()
        .pipeline(pipeline)
        .output("main", 4)
        .start()
        .unwrap();
    engine.submit("main", Event::empty()).unwrap();
    assert!(engine.wait_idle(IDLE));
    let out = engine.output("main").unwrap().try_recv().unwrap();
    assert_eq!(out.get("rescued"), Some(&json!(1)));
    assert_eq!(engine.metrics().exceptions().errors(), 1);
    assert_eq!(engine.metrics().meter_count(names::ALL_FAILED), 0);
}

#[test]
fn processing_error_without_continuation_fails() {
    let pipeline = Pipeline::new("main").processor(failing("bad", || ProcessorError::processing("nope")));
    let engine = Engine::builder()
        .pipeline(pipeline)
        .output("main", 4)
        .start()
        .unwrap();
    engine.submit("main", Event::empty()).unwrap();
    assert!(engine.wait_idle(IDLE));
    assert_eq!(engine.metrics().meter_count(names::ALL_FAILED), 1);
    assert_eq!(engine.metrics().meter_count(&names::failed("main")), 1);
    assert!(engine.output("main").unwrap().is_empty());
}

#[test]
fn unexpected_error_fails_and_counts_exception() {
    let pipeline = Pipeline::new("main").processor(
        failing("boom", || ProcessorError::unexpected(anyhow::anyhow!("disk on fire")))
            .on_exception(set("rescue", "rescued", 1)),
    );
    let engine = Engine::builder()
        .pipeline(pipeline)
        .output("main", 4)
        .start()
        .unwrap();
    engine.submit("main", Event::empty()).unwrap();
    assert!(engine.wait_idle(IDLE));
    let metrics = engine.metrics();
    assert_eq!(metrics.meter_count(&names::exception("main")), 1);
    assert_eq!(metrics.meter_count(&names::failed("main")), 1);
    assert_eq!(metrics.exceptions().exceptions(), 1);
}

#[test]
fn panic_is_contained_and_failed() {
    let pipeline = Pipeline::new("main").processor(Processor::transform(
        "panics",
        |_: &mut Event| -> Result<bool, ProcessorError> { panic!("processor bug") },
    ));
    let engine = Engine::builder()
        .pipeline(pipeline)
        .output("main", 4)
        .workers(1)
        .start()
        .unwrap();
    engine.submit("main", Event::empty()).unwrap();
    engine.submit("main", Event::empty()).unwrap();
    assert!(engine.wait_idle(IDLE));
    let metrics = engine.metrics();
    assert_eq!(metrics.meter_count(&names::failed("main")), 2);
    assert_eq!(metrics.exceptions().by_kind().get("PANIC"), Some(&2));
}

#[test]
fn synchronous_pause_is_a_failure() {
    let pipeline = Pipeline::new("main").processor(failing("sneaky", || {
        ProcessorError::Paused(PauseRequest::new(logpipe_core::CompletionToken::new()))
    }));
    let engine = Engine::builder()
        .pipeline(pipeline)
        .output("main", 4)
        .start()
        .unwrap();
    let mut quiet = Event::empty();
    quiet.set_metrics(false);
    engine.submit("main", quiet).unwrap();
    assert!(engine.wait_idle(IDLE));
    let metrics = engine.metrics();
    assert_eq!(metrics.meter_count(&names::exception("main")), 1);
    assert_eq!(metrics.exceptions().by_kind().get("ASYNC_MISMATCH"), Some(&1));
    assert!(engine.repository().is_empty());
}

#[test]
fn metrics_disabled_event_skips_per_event_metrics() {
    let pipeline = Pipeline::new("main").processor(Processor::drop_event("drop"));
    let engine = Engine::builder().pipeline(pipeline).start().unwrap();
    let mut ev = Event::empty();
    ev.set_metrics(false);
    engine.submit("main", ev).unwrap();
    assert!(engine.wait_idle(IDLE));
    assert_eq!(engine.metrics().meter_count(names::ALL_DROPPED), 0);
}

// ===========================================================================
// 3. Step ceiling
// ===========================================================================

#[test]
fn step_ceiling_plus_one_fails() {
    let counter = Arc::new(AtomicUsize::new(0));
    let pipeline = (0..5).fold(Pipeline::new("main"), |p, i| {
        p.processor(counting(&format!("c{i}"), &counter))
    });
    let engine = Engine::builder()
        .pipeline(pipeline)
        .output("main", 4)
        .max_steps(3)
        .start()
        .unwrap();
    engine.submit("main", Event::empty()).unwrap();
    assert!(engine.wait_idle(IDLE));
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert_eq!(engine.metrics().meter_count(&names::failed("main")), 1);
    assert_eq!(engine.metrics().exceptions().by_kind().get("LOOP_DETECTED"), Some(&1));
}

#[test]
fn exactly_max_steps_succeeds() {
    let counter = Arc::new(AtomicUsize::new(0));
    let pipeline = (0..3).fold(Pipeline::new("main"), |p, i| {
        p.processor(counting(&format!("c{i}"), &counter))
    });
    let engine = Engine::builder()
        .pipeline(pipeline)
        .output("main", 4)
        .max_steps(3)
        .start()
        .unwrap();
    engine.submit("main", Event::empty()).unwrap();
    assert!(engine.wait_idle(IDLE));
    assert_eq!(engine.output("main").unwrap().len(), 1);
}

#[test]
fn structural_steps_are_free() {
    let counter = Arc::new(AtomicUsize::new(0));
    let pipeline = Pipeline::new("main")
        .processor(Processor::wrap("in", ["inner"]))
        .processor(counting("c0", &counter))
        .processor(Processor::unwrap("out"))
        .processor(Processor::fork("copy", "sink"))
        .processor(counting("c1", &counter));
    let engine = Engine::builder()
        .pipeline(pipeline)
        .pipeline(Pipeline::new("sink"))
        .output("main", 4)
        .output("sink", 4)
        .max_steps(2)
        .start()
        .unwrap();
    engine.submit("main", Event::empty()).unwrap();
    assert!(engine.wait_idle(IDLE));
    assert_eq!(engine.output("main").unwrap().len(), 1);
}

#[test]
fn pipeline_cycle_is_stopped_by_ceiling() {
    let counter = Arc::new(AtomicUsize::new(0));
    let pipeline = Pipeline::new("loop")
        .processor(counting("tick", &counter))
        .then("loop");
    let engine = Engine::builder()
        .pipeline(pipeline)
        .max_steps(10)
        .start()
        .unwrap();
    engine.submit("loop", Event::empty()).unwrap();
    assert!(engine.wait_idle(IDLE));
    assert_eq!(counter.load(Ordering::SeqCst), 10);
    assert_eq!(engine.metrics().meter_count(&names::failed("loop")), 1);
}

// ===========================================================================
// 4. Routing and backpressure
// ===========================================================================

#[test]
fn full_output_queue_loses_event_without_requeue() {
    let engine = Engine::builder()
        .pipeline(Pipeline::new("main"))
        .output("main", 1)
        .workers(1)
        .start()
        .unwrap();
    engine.submit("main", Event::empty()).unwrap();
    engine.submit("main", Event::empty()).unwrap();
    assert!(engine.wait_idle(IDLE));
    assert_eq!(engine.output("main").unwrap().len(), 1);
    assert_eq!(engine.metrics().meter_count(&names::blocked_out("main")), 1);
    assert_eq!(engine.live_events(), 0);
}

#[test]
fn unknown_next_pipeline_marks_blocked_in() {
    let engine = Engine::builder()
        .pipeline(Pipeline::new("main").then("alerts"))
        .output("main", 4)
        .start()
        .unwrap();
    engine.submit("main", Event::empty()).unwrap();
    assert!(engine.wait_idle(IDLE));
    assert_eq!(engine.metrics().meter_count(&names::blocked_in("alerts")), 1);
    assert!(engine.output("main").unwrap().is_empty());
}

#[test]
fn next_pipeline_receives_event() {
    let engine = Engine::builder()
        .pipeline(Pipeline::new("main").processor(set("a", "a", 1)).then("archive"))
        .pipeline(Pipeline::new("archive").processor(set("b", "b", 2)))
        .output("main", 4)
        .output("archive", 4)
        .start()
        .unwrap();
    engine.submit("main", Event::empty()).unwrap();
    assert!(engine.wait_idle(IDLE));
    assert!(engine.output("main").unwrap().is_empty());
    let out = engine.output("archive").unwrap().try_recv().unwrap();
    assert_eq!(out.current_pipeline(), Some("archive"));
    assert_eq!(out.get("a"), Some(&json!(1)));
    assert_eq!(out.get("b"), Some(&json!(2)));
}

#[test]
fn test_event_reaches_sink_not_output() {
    let sink = Arc::new(MemoryTestSink::new());
    let engine = Engine::builder()
        .pipeline(Pipeline::new("main").processor(set("a", "a", 1)))
        .output("main", 4)
        .test_sink(sink.clone())
        .start()
        .unwrap();
    engine.submit("main", Event::empty().into_test()).unwrap();
    assert!(engine.wait_idle(IDLE));
    assert!(engine.output("main").unwrap().is_empty());
    assert_eq!(sink.len(), 1);
    assert_eq!(sink.events()[0]["fields"]["a"], json!(1));
    assert_eq!(engine.metrics().timer_count(&names::timer("main")), 0);
}

#[test]
fn no_destination_is_misconfiguration() {
    let engine = Engine::builder()
        .pipeline(Pipeline::new("main"))
        .start()
        .unwrap();
    let mut ev = Event::empty();
    ev.set_metrics(false);
    engine.submit("main", ev).unwrap();
    assert!(engine.wait_idle(IDLE));
    assert_eq!(engine.metrics().meter_count(names::ALL_FAILED), 1);
}

// ===========================================================================
// 5. Fork
// ===========================================================================

#[test]
fn fork_copy_is_independent() {
    let pipeline = Pipeline::new("main")
        .processor(set("a", "a", 1))
        .processor(set("b", "b", 2))
        .processor(Processor::fork("fork", "copies"))
        .processor(set("c", "c", 3));
    let engine = Engine::builder()
        .pipeline(pipeline)
        .pipeline(Pipeline::new("copies").processor(set("d", "d", 4)))
        .output("main", 4)
        .output("copies", 4)
        .start()
        .unwrap();
    engine.submit("main", Event::empty()).unwrap();
    assert!(engine.wait_idle(IDLE));

    let original = engine.output("main").unwrap().try_recv().unwrap();
    let copy = engine.output("copies").unwrap().try_recv().unwrap();
    assert_ne!(original.id(), copy.id());
    assert_eq!(original.steps(), 3);
    assert_eq!(copy.steps(), 1);
    assert!(copy.contains_key("b"));
    assert!(!copy.contains_key("c"));
    assert!(!original.contains_key("d"));
}

#[test]
fn fork_to_unknown_pipeline_keeps_original() {
    let pipeline = Pipeline::new("main").processor(Processor::fork("fork", "nowhere"));
    let engine = Engine::builder()
        .pipeline(pipeline)
        .output("main", 4)
        .start()
        .unwrap();
    engine.submit("main", Event::empty()).unwrap();
    assert!(engine.wait_idle(IDLE));
    assert_eq!(engine.output("main").unwrap().len(), 1);
    assert_eq!(engine.metrics().meter_count(&names::blocked_in("nowhere")), 1);
}

// ===========================================================================
// 6. Lanes
// ===========================================================================

#[test]
fn each_event_takes_one_lane_per_step() {
    let counter = Arc::new(AtomicUsize::new(0));
    let lanes = (0..3).map(|i| Arc::new(counting(&format!("lane{i}"), &counter))).collect();
    let engine = Engine::builder()
        .pipeline(Pipeline::new("main").step(PipeStep::with_lanes(lanes)))
        .output("main", 32)
        .workers(3)
        .start()
        .unwrap();
    for _ in 0..20 {
        engine.submit("main", Event::empty()).unwrap();
    }
    assert!(engine.wait_idle(IDLE));
    assert_eq!(counter.load(Ordering::SeqCst), 20);
}

// ===========================================================================
// 7. Engine surface
// ===========================================================================

#[test]
fn builder_rejects_zero_sizes_and_duplicates() {
    assert!(matches!(
        Engine::builder().workers(0).start(),
        Err(EngineError::InvalidSetting { name: "workers" })
    ));
    assert!(matches!(
        Engine::builder().max_steps(0).start(),
        Err(EngineError::InvalidSetting { name: "max_steps" })
    ));
    assert!(matches!(
        Engine::builder()
            .pipeline(Pipeline::new("p"))
            .pipeline(Pipeline::new("p"))
            .start(),
        Err(EngineError::DuplicatePipeline { .. })
    ));
}

#[test]
fn submit_to_unknown_pipeline_is_rejected() {
    let engine = Engine::builder().start().unwrap();
    let err = engine.submit("ghost", Event::empty()).unwrap_err();
    assert!(matches!(err, EngineError::UnknownPipeline { .. }));
    assert_eq!(engine.live_events(), 0);
}

#[test]
fn try_submit_reports_full_queue() {
    let (entered_tx, entered_rx) = crossbeam_channel::bounded::<()>(1);
    let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
    let gate = Processor::transform("gate", move |_: &mut Event| -> Result<bool, ProcessorError> {
        let _ = entered_tx.try_send(());
        let _ = release_rx.recv_timeout(Duration::from_secs(5));
        Ok(true)
    });
    let engine = Engine::builder()
        .pipeline(Pipeline::new("main").processor(gate))
        .output("main", 8)
        .workers(1)
        .queue_depth(1)
        .start()
        .unwrap();
    engine.try_submit("main", Event::empty()).unwrap();
    entered_rx.recv_timeout(IDLE).unwrap();
    engine.try_submit("main", Event::empty()).unwrap();
    let err = engine.try_submit("main", Event::empty()).unwrap_err();
    assert!(matches!(err, EngineError::QueueFull { .. }));
    assert_eq!(engine.metrics().meter_count(&names::blocked_in("main")), 1);
    release_tx.send(()).unwrap();
    release_tx.send(()).unwrap();
    assert!(engine.wait_idle(IDLE));
    assert_eq!(engine.output("main").unwrap().len(), 2);
}
