//! Checklist rendering through caller-supplied renderers and sinks

use parking_lot::Mutex;
use perps_engine::step_tracker::{
    finalize_guard, phases, BufferSink, ChecklistRenderer, PhaseSpec, StepRecord, StepStatus,
    StepTracker,
};
use serde_json::json;
use std::sync::Arc;

struct JsonRenderer;

impl ChecklistRenderer for JsonRenderer {
    fn render(&self, records: &[StepRecord]) -> String {
        let steps: Vec<_> = records
            .iter()
            .map(|r| {
                json!({
                    "key": r.key,
                    "status": format!("{:?}", r.status),
                    "note": r.note,
                    "subs": r.subs.iter().map(|s| s.name.clone()).collect::<Vec<_>>(),
                })
            })
            .collect();
        serde_json::to_string(&steps).unwrap()
    }
}

const CUSTOM: [PhaseSpec; 2] = [
    PhaseSpec::new("load", "Load inputs"),
    PhaseSpec::new("send", "Send"),
];

#[test]
fn custom_renderer_sees_declared_phases() {
    let sink = BufferSink::new();
    let tracker = StepTracker::with_output(&CUSTOM, Box::new(JsonRenderer), Box::new(sink.clone()));

    tracker.start("load");
    tracker.ok("load", "3 inputs");
    tracker.sub_fail("send", "preflight", "rejected");
    tracker.fail("send", "");
    assert!(tracker.flush());

    let emitted = sink.emitted();
    assert_eq!(emitted.len(), 1);
    let parsed: serde_json::Value = serde_json::from_str(&emitted[0]).unwrap();
    assert_eq!(parsed[0]["key"], "load");
    assert_eq!(parsed[0]["status"], "Ok");
    assert_eq!(parsed[0]["note"], "3 inputs");
    assert_eq!(parsed[1]["status"], "Fail");
    assert!(parsed[1]["note"].is_null());
    assert_eq!(parsed[1]["subs"][0], "preflight");
}

fn failing_operation(tracker: Arc<StepTracker>) -> Result<(), String> {
    let _guard = finalize_guard(tracker.clone());
    tracker.start(phases::INTENT);
    tracker.fail(phases::INTENT, "size must be positive");
    Err("invalid intent".to_string())
}

#[test]
fn guard_flushes_on_early_return() {
    let sink = BufferSink::new();
    let tracker = Arc::new(StepTracker::with_output(
        &phases::PIPELINE,
        Box::new(perps_engine::step_tracker::PlainTextRenderer),
        Box::new(sink.clone()),
    ));

    assert!(failing_operation(tracker.clone()).is_err());

    assert!(tracker.is_flushed());
    let emitted = sink.emitted();
    assert_eq!(emitted.len(), 1);
    assert!(emitted[0].contains("[FAIL   ] intent"));
    assert!(emitted[0].contains("| size must be positive"));
    assert_eq!(tracker.status(phases::NETWORK), Some(StepStatus::Pending));

    // later flushes are no-ops
    assert!(!tracker.flush());
    assert_eq!(sink.emitted().len(), 1);
}

#[test]
fn concurrent_updates_are_all_recorded() {
    let tracker = Arc::new(StepTracker::pipeline());
    let seen = Arc::new(Mutex::new(0usize));

    let handles: Vec<_> = phases::PIPELINE
        .iter()
        .map(|phase| {
            let tracker = tracker.clone();
            let seen = seen.clone();
            let key = phase.key;
            std::thread::spawn(move || {
                tracker.start(key);
                tracker.ok(key, "done");
                *seen.lock() += 1;
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(*seen.lock(), phases::PIPELINE.len());
    assert!(tracker
        .records()
        .iter()
        .all(|r| r.status == StepStatus::Ok));
}
