use trigflow::{
    HeartbeatConfig, HeartbeatEngine, HeartbeatError, MonotonicClock, StreamId, SystemKind,
    TimeSlice, TriggerPrimitive,
};

struct MockClock {
    readings: Vec<u64>,
    idx: usize,
}

impl MockClock {
    fn new(readings: Vec<u64>) -> Self {
        Self { readings, idx: 0 }
    }
}

impl MonotonicClock for MockClock {
    fn now_ms(&mut self) -> u64 {
        let reading = self
            .readings
            .get(self.idx)
            .copied()
            .unwrap_or_else(|| *self.readings.last().unwrap());
        self.idx += 1;
        reading
    }
}

// 1 MHz clock: 1000 ticks per wall-clock millisecond.
fn config(interval: u64, offset_ms: u64) -> HeartbeatConfig {
    HeartbeatConfig {
        clock_frequency_hz: 1_000_000,
        heartbeat_interval: interval,
        heartbeat_send_offset_ms: offset_ms,
    }
}

fn payload(start: u64) -> TimeSlice<TriggerPrimitive> {
    TimeSlice::payload(
        StreamId::new(SystemKind::Detector, 1, 4),
        9,
        start,
        start + 10,
        vec![TriggerPrimitive {
            time_start: start,
            ..TriggerPrimitive::default()
        }],
    )
}

#[test]
fn first_payload_is_preceded_by_an_aligned_heartbeat() {
    let mut engine = HeartbeatEngine::new(config(100, 0), 9, Box::new(MockClock::new(vec![0])));
    let out = engine.on_payload(payload(1050)).expect("monotonic");

    assert_eq!(out.len(), 2);
    assert!(out[0].is_heartbeat());
    assert_eq!(out[0].start_time, 1000);
    assert_eq!(out[0].origin, StreamId::new(SystemKind::Detector, 1, 4));
    assert_eq!(out[0].run_number, 9);
    assert!(out[1].is_payload());
    assert_eq!(out[1].start_time, 1050);
    assert_eq!((out[0].seqno, out[1].seqno), (0, 1));
}

#[test]
fn owed_heartbeats_are_emitted_before_a_late_payload() {
    let mut engine = HeartbeatEngine::new(config(100, 0), 9, Box::new(MockClock::new(vec![0, 0])));
    engine.on_payload(payload(1000)).unwrap();

    let out = engine.on_payload(payload(1350)).expect("monotonic");
    let starts: Vec<u64> = out.iter().map(|slice| slice.start_time).collect();
    assert_eq!(starts, vec![1100, 1200, 1300, 1350]);
    assert!(out[0].is_heartbeat() && out[1].is_heartbeat() && out[2].is_heartbeat());
    assert!(out[3].is_payload());
}

#[test]
fn wall_clock_silence_extrapolates_heartbeats() {
    // Payload seen at wall 0; the tick fires at wall 2 ms.
    let mut engine = HeartbeatEngine::new(config(100, 0), 9, Box::new(MockClock::new(vec![0, 2])));
    engine.on_payload(payload(1000)).unwrap();

    let due: Vec<TimeSlice<TriggerPrimitive>> = engine.on_tick();
    // Extrapolated now: 1000 + 2 ms * 1000 ticks/ms = 3000 ticks.
    let starts: Vec<u64> = due.iter().map(|slice| slice.start_time).collect();
    assert_eq!(starts.first(), Some(&1100));
    assert_eq!(starts.last(), Some(&3000));
    assert_eq!(starts.len(), 20);
    assert!(due.iter().all(TimeSlice::is_heartbeat));
}

#[test]
fn send_offset_holds_heartbeats_back() {
    // 2 ms elapsed but a 2 ms offset: the boundary stays at the payload.
    let mut engine = HeartbeatEngine::new(config(100, 2), 9, Box::new(MockClock::new(vec![0, 2])));
    engine.on_payload(payload(1000)).unwrap();
    assert!(engine.on_tick::<TriggerPrimitive>().is_empty());
}

#[test]
fn no_extrapolation_before_the_first_payload() {
    let mut engine = HeartbeatEngine::new(config(100, 0), 9, Box::new(MockClock::new(vec![5])));
    assert!(engine.on_tick::<TriggerPrimitive>().is_empty());
}

#[test]
fn regressing_payload_is_a_fatal_error() {
    let mut engine = HeartbeatEngine::new(config(100, 0), 9, Box::new(MockClock::new(vec![0, 0])));
    engine.on_payload(payload(1000)).unwrap();
    let err = engine.on_payload(payload(900)).unwrap_err();
    assert_eq!(
        err,
        HeartbeatError::Monotonicity {
            previous: 1000,
            current: 900,
        }
    );
}
