use trigflow::{LatencyStore, RequestOutcome, TriggerPrimitive};

fn tp(time_start: u64) -> TriggerPrimitive {
    TriggerPrimitive {
        time_start,
        channel: time_start as u32,
        ..TriggerPrimitive::default()
    }
}

#[test]
fn tracks_the_buffered_time_extent() {
    let mut store = LatencyStore::new(16);
    assert_eq!(store.earliest(), None);
    for time in [120, 100, 180] {
        store.insert(tp(time));
    }
    assert_eq!(store.earliest(), Some(100));
    assert_eq!(store.latest(), Some(180));
    assert_eq!(store.len(), 3);
}

#[test]
fn classifies_requests_against_the_extent() {
    let mut store = LatencyStore::new(16);
    for time in 100..=200 {
        store.insert(tp(time));
    }
    assert_eq!(store.classify(120, 180), RequestOutcome::Success);
    assert_eq!(store.classify(0, 50), RequestOutcome::Empty);
    assert_eq!(store.classify(300, 400), RequestOutcome::Late);
    // Straddling the latest time: the tail has not arrived yet.
    assert_eq!(store.classify(150, 250), RequestOutcome::Late);
}

#[test]
fn an_empty_store_reports_late() {
    let store: LatencyStore<TriggerPrimitive> = LatencyStore::new(4);
    assert_eq!(store.classify(0, 10), RequestOutcome::Late);
}

#[test]
fn window_lookup_is_inclusive() {
    let mut store = LatencyStore::new(16);
    for time in [90, 100, 150, 200, 210] {
        store.insert(tp(time));
    }
    let objects = store.objects_in_window(100, 200);
    let starts: Vec<u64> = objects.iter().map(|tp| tp.time_start).collect();
    assert_eq!(starts, vec![100, 150, 200]);
}

#[test]
fn capacity_evicts_the_oldest_objects() {
    let mut store = LatencyStore::new(3);
    for time in [10, 20, 30, 40, 50] {
        store.insert(tp(time));
    }
    assert_eq!(store.len(), 3);
    assert_eq!(store.earliest(), Some(30));
    assert_eq!(store.latest(), Some(50));
}

#[test]
fn duplicate_timestamps_are_all_kept() {
    let mut store = LatencyStore::new(8);
    store.insert(tp(100));
    store.insert(tp(100));
    assert_eq!(store.len(), 2);
    assert_eq!(store.objects_in_window(100, 100).len(), 2);
}
