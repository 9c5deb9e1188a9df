use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use trigflow::{
    wire, BoundedQueue, CandidateAlgorithm, CandidateKind, EndpointRegistry, Issue, IssueLog,
    ModuleLevelTrigger, MonotonicClock, TriggerCandidate, TriggerDecision, TriggerDecisionToken,
    TriggerInhibit,
};

/// Wall clock shared between the test and the trigger worker.
#[derive(Clone, Default)]
struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    fn set(&self, ms: u64) {
        self.0.store(ms, Ordering::SeqCst);
    }
}

impl MonotonicClock for ManualClock {
    fn now_ms(&mut self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

fn tc(time_candidate: u64, kind: CandidateKind, detid: u32) -> TriggerCandidate {
    TriggerCandidate {
        time_start: time_candidate,
        time_end: time_candidate,
        time_candidate,
        detid,
        kind,
        algorithm: CandidateAlgorithm::HsiEventConversion,
        inputs: Vec::new(),
    }
}

// The 1 kHz clock frequency makes one detector tick equal one wall
// millisecond, so expirations can be reasoned about directly.
fn base_config(passthrough: bool, td_out_of_timeout: bool) -> serde_json::Value {
    json!({
        "links": [
            {"system": "detector", "region": 0, "element": 0},
            {"system": "detector", "region": 0, "element": 1},
        ],
        "dfo_connection": "td-out",
        "dfo_busy_connection": "dfo-busy",
        "token_connection": "tokens",
        "initial_tokens": 10,
        "hsi_trigger_type_passthrough": passthrough,
        "buffer_timeout": 10,
        "td_out_of_timeout": td_out_of_timeout,
        "clock_frequency_hz": 1000,
        "c0": {"candidate_type": 0, "time_before": 0, "time_after": 100},
        "c1": {"candidate_type": 1, "time_before": 0, "time_after": 100},
        "c2": {"candidate_type": 2, "time_before": 0, "time_after": 100},
    })
}

struct Fixture {
    mlt: ModuleLevelTrigger,
    candidates: Arc<BoundedQueue<TriggerCandidate>>,
    transport: EndpointRegistry,
    clock: ManualClock,
    issues: IssueLog,
}

fn fixture(params: serde_json::Value) -> Fixture {
    let candidates = BoundedQueue::new(16);
    let transport = EndpointRegistry::new();
    transport.declare("td-out");
    transport.declare("dfo-busy");
    transport.declare("tokens");
    let issues = IssueLog::new();
    let clock = ManualClock::default();
    let mut mlt = ModuleLevelTrigger::new("mlt", candidates.clone(), transport.clone(), issues.clone());
    mlt.configure(&params).expect("valid config");
    mlt.set_clocks(Box::new(clock.clone()), Box::new(clock.clone()));
    Fixture {
        mlt,
        candidates,
        transport,
        clock,
        issues,
    }
}

fn feed(fx: &Fixture, candidate: TriggerCandidate) {
    fx.candidates
        .send(candidate, Duration::from_millis(100))
        .expect("candidate queue has room");
}

fn settle() {
    std::thread::sleep(Duration::from_millis(250));
}

fn decisions(fx: &Fixture) -> Vec<TriggerDecision> {
    fx.transport
        .drain("td-out")
        .expect("declared endpoint")
        .into_iter()
        .map(|frame| wire::decode(frame).expect("decision frame"))
        .collect()
}

#[test]
fn overlapping_candidates_coalesce_into_one_decision() {
    let mut fx = fixture(base_config(false, false));
    fx.mlt.start(11).expect("configured");
    fx.mlt.resume();

    // Readout intervals: [50, 150], [120, 220] (overlap), [300, 400].
    feed(&fx, tc(50, CandidateKind::Unknown, 0));
    feed(&fx, tc(120, CandidateKind::Unknown, 0));
    feed(&fx, tc(300, CandidateKind::Unknown, 0));
    settle();
    fx.clock.set(10_000);
    settle();
    fx.mlt.stop();

    let sent = decisions(&fx);
    assert_eq!(sent.len(), 2, "two clusters, two decisions");
    assert_eq!(sent[0].trigger_number, 1);
    assert_eq!(sent[1].trigger_number, 2);
    assert_eq!(sent[0].trigger_timestamp, 50);
    assert_eq!(sent[1].trigger_timestamp, 300);
    assert_eq!(sent[0].run_number, 11);
    assert_eq!(sent[0].components.len(), 2);
    assert_eq!(sent[0].components[0].window_begin, 50);
    assert_eq!(sent[0].components[0].window_end, 220);
    assert_eq!(sent[1].components[0].window_begin, 300);
    assert_eq!(sent[1].components[0].window_end, 400);
    assert_eq!(sent[0].trigger_type, 1, "passthrough disabled");
}

#[test]
fn paused_runs_count_but_do_not_emit() {
    let mut fx = fixture(base_config(false, false));
    fx.mlt.start(12).expect("configured");

    feed(&fx, tc(10, CandidateKind::Unknown, 0));
    fx.clock.set(5_000);
    settle();
    assert!(decisions(&fx).is_empty(), "started paused");
    assert_eq!(fx.mlt.info().td_paused, 1);

    fx.mlt.resume();
    feed(&fx, tc(6_000, CandidateKind::Unknown, 0));
    settle();
    fx.clock.set(20_000);
    settle();

    let sent = decisions(&fx);
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].trigger_number, 1,
        "paused decision did not consume a trigger number"
    );
    fx.mlt.stop();
}

#[test]
fn passthrough_encodes_the_trigger_type() {
    let mut fx = fixture(base_config(true, false));
    fx.mlt.start(13).expect("configured");
    fx.mlt.resume();

    feed(&fx, tc(100, CandidateKind::Timing, 0x3ab));
    feed(&fx, tc(10_000, CandidateKind::Activity, 0));
    settle();
    fx.clock.set(60_000);
    settle();
    fx.mlt.stop();

    let sent = decisions(&fx);
    assert_eq!(sent.len(), 2);
    // Timing candidates pass the low byte of the signal map through.
    assert_eq!(sent[0].trigger_type, 0xab);
    // Other kinds carry their kind code in the high byte.
    assert_eq!(sent[1].trigger_type, u16::from(CandidateKind::Activity.code()) << 8);
}

#[test]
fn overlap_with_a_recent_decision_is_dropped_by_default() {
    let mut fx = fixture(base_config(false, false));
    fx.mlt.start(14).expect("configured");
    fx.mlt.resume();

    feed(&fx, tc(100, CandidateKind::Unknown, 0));
    settle();
    fx.clock.set(1_000);
    settle();
    assert_eq!(decisions(&fx).len(), 1);

    // [150, 250] overlaps the recently sent [100, 200].
    feed(&fx, tc(150, CandidateKind::Unknown, 0));
    settle();
    fx.clock.set(2_000);
    settle();
    fx.mlt.stop();

    assert!(decisions(&fx).is_empty(), "overlapping decision dropped");
    assert_eq!(fx.mlt.info().td_dropped_overlap, 1);
    assert_eq!(
        fx.issues
            .count_matching(|issue| matches!(issue, Issue::TcOutOfTimeout { .. })),
        1
    );
}

#[test]
fn overlap_policy_flag_keeps_the_decision() {
    let mut fx = fixture(base_config(false, true));
    fx.mlt.start(15).expect("configured");
    fx.mlt.resume();

    feed(&fx, tc(100, CandidateKind::Unknown, 0));
    settle();
    fx.clock.set(1_000);
    settle();
    feed(&fx, tc(150, CandidateKind::Unknown, 0));
    settle();
    fx.clock.set(2_000);
    settle();
    fx.mlt.stop();

    let sent = decisions(&fx);
    assert_eq!(sent.len(), 2, "policy keeps overlapping decisions");
    assert_eq!(sent[1].trigger_number, 2);
}

#[test]
fn inhibit_gates_emission_until_released() {
    let mut fx = fixture(base_config(false, false));
    fx.mlt.start(16).expect("configured");
    fx.mlt.resume();

    let busy = TriggerInhibit {
        run_number: 16,
        busy: true,
    };
    fx.transport
        .send_to("dfo-busy", wire::encode(&busy), Duration::from_millis(1))
        .unwrap();

    feed(&fx, tc(100, CandidateKind::Unknown, 0));
    settle();
    fx.clock.set(1_000);
    settle();
    assert!(decisions(&fx).is_empty(), "inhibited while busy");
    assert_eq!(fx.mlt.info().td_inhibited, 1);
    assert_eq!(
        fx.issues
            .count_matching(|issue| matches!(issue, Issue::TriggerInhibited { .. })),
        1
    );

    let released = TriggerInhibit {
        run_number: 16,
        busy: false,
    };
    fx.transport
        .send_to("dfo-busy", wire::encode(&released), Duration::from_millis(1))
        .unwrap();
    feed(&fx, tc(5_000, CandidateKind::Unknown, 0));
    settle();
    fx.clock.set(20_000);
    settle();
    fx.mlt.stop();

    let sent = decisions(&fx);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].trigger_number, 1);
}

#[test]
fn failed_sends_do_not_consume_trigger_numbers() {
    let candidates = BoundedQueue::new(16);
    let transport = EndpointRegistry::new();
    // Room for exactly one undelivered decision.
    transport.declare_with_capacity("td-out", 1);
    transport.declare("dfo-busy");
    transport.declare("tokens");
    let issues = IssueLog::new();
    let clock = ManualClock::default();
    let mut mlt =
        ModuleLevelTrigger::new("mlt", candidates.clone(), transport.clone(), issues.clone());
    mlt.configure(&base_config(false, false)).expect("valid config");
    mlt.set_clocks(Box::new(clock.clone()), Box::new(clock.clone()));
    mlt.start(17).expect("configured");
    mlt.resume();
    let mut fx = Fixture {
        mlt,
        candidates,
        transport: transport.clone(),
        clock: clock.clone(),
        issues: issues.clone(),
    };

    feed(&fx, tc(100, CandidateKind::Unknown, 0));
    settle();
    clock.set(1_000);
    settle();

    // The mailbox is full: this decision's send fails.
    feed(&fx, tc(5_000, CandidateKind::Unknown, 0));
    settle();
    clock.set(10_000);
    settle();

    let first = decisions(&fx);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].trigger_number, 1);
    assert_eq!(fx.mlt.info().td_send_failed, 1);

    // With the mailbox drained, the next decision reuses number 2.
    feed(&fx, tc(50_000, CandidateKind::Unknown, 0));
    settle();
    fx.clock.set(100_000);
    settle();
    fx.mlt.stop();

    let next = decisions(&fx);
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].trigger_number, 2);
}

#[test]
fn token_exhaustion_inhibits_emission() {
    let mut params = base_config(false, false);
    params["initial_tokens"] = json!(1);
    let mut fx = fixture(params);
    fx.mlt.start(18).expect("configured");
    fx.mlt.resume();

    feed(&fx, tc(100, CandidateKind::Unknown, 0));
    settle();
    fx.clock.set(1_000);
    settle();
    assert_eq!(decisions(&fx).len(), 1);
    let tokens = fx.mlt.tokens().expect("running");
    assert!(!tokens.triggers_allowed(), "the only token is spent");

    // The next decision is inhibited until a token comes back.
    feed(&fx, tc(5_000, CandidateKind::Unknown, 0));
    settle();
    fx.clock.set(10_000);
    settle();
    assert!(decisions(&fx).is_empty());
    assert_eq!(fx.mlt.info().td_inhibited, 1);

    let token = TriggerDecisionToken {
        run_number: 18,
        trigger_number: 1,
    };
    fx.transport
        .send_to("tokens", wire::encode(&token), Duration::from_millis(1))
        .unwrap();
    assert_eq!(tokens.n_tokens(), 1);
    assert!(tokens.triggers_allowed());

    feed(&fx, tc(50_000, CandidateKind::Unknown, 0));
    settle();
    fx.clock.set(100_000);
    settle();
    fx.mlt.stop();
    assert_eq!(decisions(&fx).len(), 1);
}

#[test]
fn stop_flushes_pending_decisions_despite_pause() {
    let mut fx = fixture(base_config(false, false));
    fx.mlt.start(19).expect("configured");

    // Still paused; the buffer timeout never elapses either.
    feed(&fx, tc(100, CandidateKind::Unknown, 0));
    settle();
    fx.mlt.stop();

    let sent = decisions(&fx);
    assert_eq!(sent.len(), 1, "stop drains pending decisions");
    assert_eq!(sent[0].trigger_number, 1);
}

#[test]
fn configure_requires_declared_endpoints() {
    let candidates = BoundedQueue::new(4);
    let transport = EndpointRegistry::new();
    transport.declare("td-out");
    // dfo-busy and tokens are missing.
    let mut mlt = ModuleLevelTrigger::new("mlt", candidates, transport, IssueLog::new());
    assert!(mlt.configure(&base_config(false, false)).is_err());
}
