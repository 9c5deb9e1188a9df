use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use trigflow::{
    BoundedQueue, CandidateKind, HsiCandidateMaker, HsiConfig, HsiConverter, HsiError, HsiEvent,
    Issue, IssueLog, TriggerCandidate,
};

fn mapped_config() -> HsiConfig {
    serde_json::from_value(json!({
        "s0": {"signal_type": 1, "time_before": 50, "time_after": 200},
        "s1": {"signal_type": 2, "time_before": 10, "time_after": 20},
        "hsi_trigger_type_passthrough": false,
    }))
    .expect("valid config")
}

fn passthrough_config() -> HsiConfig {
    serde_json::from_value(json!({
        "s0": {"signal_type": 1, "time_before": 50, "time_after": 200},
        "hsi_trigger_type_passthrough": true,
    }))
    .expect("valid config")
}

fn event(timestamp: u64, signal_map: u32) -> HsiEvent {
    HsiEvent {
        run_number: 8,
        sequence: 0,
        timestamp,
        signal_map,
        header: 0,
    }
}

#[test]
fn mapped_signals_use_their_configured_offsets() {
    let converter = HsiConverter::from_config(&mapped_config());
    let candidate = converter.convert(&event(1000, 2)).expect("known signal");
    assert_eq!(candidate.time_start, 990);
    assert_eq!(candidate.time_end, 1020);
    assert_eq!(candidate.time_candidate, 1000);
    assert_eq!(candidate.detid, 2);
    assert_eq!(candidate.kind, CandidateKind::Timing);
}

#[test]
fn unknown_signals_are_rejected_in_mapped_mode() {
    let converter = HsiConverter::from_config(&mapped_config());
    assert_eq!(
        converter.convert(&event(1000, 7)).unwrap_err(),
        HsiError::UnknownSignal(7)
    );
}

#[test]
fn passthrough_applies_one_window_to_every_signal() {
    let converter = HsiConverter::from_config(&passthrough_config());
    let candidate = converter.convert(&event(1000, 0x42)).expect("low byte only");
    assert_eq!(candidate.time_start, 950);
    assert_eq!(candidate.time_end, 1200);
    assert_eq!(candidate.detid, 0x42);
}

#[test]
fn passthrough_rejects_high_bits_in_the_signal_map() {
    let converter = HsiConverter::from_config(&passthrough_config());
    assert_eq!(
        converter.convert(&event(1000, 0x1_42)).unwrap_err(),
        HsiError::BadBitmask(0x1_42)
    );
}

#[test]
fn component_converts_events_and_counts_errors() {
    let input = BoundedQueue::new(16);
    let output: Arc<BoundedQueue<TriggerCandidate>> = BoundedQueue::new(16);
    let issues = IssueLog::new();
    let mut maker = HsiCandidateMaker::new("hsi", input.clone(), output.clone(), issues.clone());
    maker
        .configure(&json!({
            "s0": {"signal_type": 1, "time_before": 50, "time_after": 200},
            "hsi_trigger_type_passthrough": false,
        }))
        .expect("valid config");
    maker.start().expect("configured");

    input.send(event(1000, 1), Duration::from_millis(100)).unwrap();
    input.send(event(2000, 9), Duration::from_millis(100)).unwrap();
    input.send(event(3000, 1), Duration::from_millis(100)).unwrap();

    let first = output.recv(Duration::from_secs(2)).expect("candidate");
    assert_eq!(first.time_candidate, 1000);
    let second = output.recv(Duration::from_secs(2)).expect("candidate");
    assert_eq!(second.time_candidate, 3000, "bad event was skipped");

    maker.stop();
    let info = maker.info();
    assert_eq!(info.events_received, 3);
    assert_eq!(info.candidates_sent, 2);
    assert_eq!(info.signal_errors, 1);
    assert_eq!(
        issues.count_matching(|issue| matches!(issue, Issue::SignalTypeError { signal_map: 9 })),
        1
    );
}
