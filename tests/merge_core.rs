use std::time::{Duration, Instant};
use trigflow::Merge;

fn drain_waiting(merge: &mut Merge<&'static str>) -> Vec<u64> {
    let mut nodes = Vec::new();
    merge.drain_waiting(&mut nodes);
    nodes.into_iter().map(|node| node.ordering).collect()
}

fn drain_full(merge: &mut Merge<&'static str>) -> Vec<u64> {
    let mut nodes = Vec::new();
    merge.drain_full(&mut nodes);
    nodes.into_iter().map(|node| node.ordering).collect()
}

#[test]
fn two_streams_merge_in_order() {
    let mut merge = Merge::new(2, Duration::from_millis(100));
    let debut = Instant::now();
    for (ordering, identity) in [(10, 1), (12, 1), (11, 2), (13, 2), (14, 2)] {
        assert!(merge.feed("set", ordering, identity, debut));
    }

    let emitted = drain_waiting(&mut merge);
    let rest = drain_full(&mut merge);
    let all: Vec<u64> = emitted.into_iter().chain(rest).collect();
    assert_eq!(all, vec![10, 11, 12, 13, 14]);
}

#[test]
fn incomplete_streams_block_waiting_drain() {
    let mut merge = Merge::new(2, Duration::from_millis(100));
    let debut = Instant::now();
    merge.feed("set", 10, 1, debut);
    merge.feed("set", 20, 1, debut);

    // Stream 2 has never been represented: nothing may be emitted.
    assert_eq!(drain_waiting(&mut merge), Vec::<u64>::new());
}

#[test]
fn latency_bound_frees_a_blocked_head() {
    let mut merge = Merge::new(2, Duration::from_millis(100));
    let debut = Instant::now();
    merge.feed("set", 10, 1, debut);
    merge.feed("set", 20, 1, debut);
    merge.feed("set", 30, 1, debut);

    let mut nodes = Vec::new();
    merge.drain_prompt(debut + Duration::from_millis(50), &mut nodes);
    assert!(nodes.is_empty(), "latency bound has not fired yet");

    merge.drain_prompt(debut + Duration::from_millis(150), &mut nodes);
    let orderings: Vec<u64> = nodes.iter().map(|node| node.ordering).collect();
    assert_eq!(orderings, vec![10, 20, 30]);
}

#[test]
fn tardy_nodes_are_rejected_after_emission() {
    let mut merge = Merge::new(1, Duration::ZERO);
    let debut = Instant::now();
    merge.feed("set", 10, 1, debut);
    merge.feed("set", 20, 1, debut);
    let emitted = drain_waiting(&mut merge);
    assert_eq!(emitted, vec![10]);
    assert_eq!(merge.origin(), 10);

    assert!(!merge.feed("late", 5, 1, debut), "older than the origin");
    assert!(merge.feed("ok", 10, 1, debut), "equal to the origin is fine");
}

#[test]
fn drain_full_on_empty_merge_yields_nothing() {
    let mut merge: Merge<&'static str> = Merge::new(2, Duration::from_millis(100));
    assert_eq!(drain_full(&mut merge), Vec::<u64>::new());
}

#[test]
fn clear_resets_the_origin() {
    let mut merge = Merge::new(1, Duration::ZERO);
    let debut = Instant::now();
    merge.feed("set", 100, 1, debut);
    drain_waiting(&mut merge);
    drain_full(&mut merge);
    assert_eq!(merge.origin(), 100);

    merge.clear();
    assert_eq!(merge.origin(), 0);
    assert!(merge.feed("set", 5, 1, debut), "accepted again after clear");
}

#[test]
fn equal_keys_emit_in_feed_order() {
    let mut merge = Merge::new(1, Duration::ZERO);
    let debut = Instant::now();
    merge.feed("first", 10, 1, debut);
    merge.feed("second", 10, 1, debut);
    merge.feed("third", 10, 1, debut);

    let mut nodes = Vec::new();
    merge.drain_full(&mut nodes);
    let payloads: Vec<&str> = nodes.into_iter().map(|node| node.payload).collect();
    assert_eq!(payloads, vec!["first", "second", "third"]);
}
