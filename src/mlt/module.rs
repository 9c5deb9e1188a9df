use super::livetime::{LivetimeCounter, LivetimeState};
use super::pending::{PendingDecision, PendingDecisions};
use super::tokens::TokenManager;
use crate::clock::{MonotonicClock, SystemClock};
use crate::config::{self, ConfigError, MltConfig};
use crate::data::messages::{
    ComponentRequest, ReadoutKind, TriggerDecision, TriggerDecisionToken, TriggerInhibit,
};
use crate::data::primitives::{CandidateKind, TriggerCandidate};
use crate::data::types::{RunNumber, StreamId, Timestamp, TriggerNumber};
use crate::observability::issue::{Issue, IssueLog};
use crate::runtime::endpoint::EndpointRegistry;
use crate::runtime::queue::{BoundedQueue, RecvError, DEFAULT_RECV_TIMEOUT};
use crate::runtime::worker::WorkerThread;
use crate::wire;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Decisions go out with a short deadline; the transport is expected to be
/// fast or busy, never slow.
const DECISION_SEND_TIMEOUT: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
pub struct MltMetrics {
    tc_received: AtomicU64,
    td_sent: AtomicU64,
    td_inhibited: AtomicU64,
    td_paused: AtomicU64,
    td_dropped_overlap: AtomicU64,
    td_send_failed: AtomicU64,
    td_total: AtomicU64,
    livetime_live_ms: AtomicU64,
    livetime_paused_ms: AtomicU64,
    livetime_dead_ms: AtomicU64,
}

/// Counter snapshot exposed for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MltInfo {
    pub tc_received: u64,
    pub td_sent: u64,
    pub td_inhibited: u64,
    pub td_paused: u64,
    pub td_dropped_overlap: u64,
    pub td_send_failed: u64,
    pub td_total: u64,
    pub livetime_live_ms: u64,
    pub livetime_paused_ms: u64,
    pub livetime_dead_ms: u64,
}

impl MltMetrics {
    fn snapshot(&self) -> MltInfo {
        MltInfo {
            tc_received: self.tc_received.load(Ordering::Relaxed),
            td_sent: self.td_sent.load(Ordering::Relaxed),
            td_inhibited: self.td_inhibited.load(Ordering::Relaxed),
            td_paused: self.td_paused.load(Ordering::Relaxed),
            td_dropped_overlap: self.td_dropped_overlap.load(Ordering::Relaxed),
            td_send_failed: self.td_send_failed.load(Ordering::Relaxed),
            td_total: self.td_total.load(Ordering::Relaxed),
            livetime_live_ms: self.livetime_live_ms.load(Ordering::Relaxed),
            livetime_paused_ms: self.livetime_paused_ms.load(Ordering::Relaxed),
            livetime_dead_ms: self.livetime_dead_ms.load(Ordering::Relaxed),
        }
    }
}

/// Module-level trigger: consumes candidates, clusters overlapping ones
/// into pending decisions, waits out the buffer timeout for latecomers,
/// gates on pause/inhibit/token state, and emits decisions to the
/// configured endpoint.
///
/// A run starts paused; an explicit `resume` opens the tap.
pub struct ModuleLevelTrigger {
    name: String,
    cfg: Option<MltConfig>,
    candidates: Arc<BoundedQueue<TriggerCandidate>>,
    transport: EndpointRegistry,
    issues: IssueLog,
    metrics: Arc<MltMetrics>,
    paused: Arc<AtomicBool>,
    dfo_busy: Arc<AtomicBool>,
    run_number: RunNumber,
    livetime: Option<Arc<LivetimeCounter>>,
    tokens: Option<Arc<TokenManager>>,
    worker_clock: Option<Box<dyn MonotonicClock>>,
    livetime_clock: Option<Box<dyn MonotonicClock>>,
    worker: Option<WorkerThread>,
}

impl ModuleLevelTrigger {
    pub fn new(
        name: &str,
        candidates: Arc<BoundedQueue<TriggerCandidate>>,
        transport: EndpointRegistry,
        issues: IssueLog,
    ) -> Self {
        Self {
            name: name.to_string(),
            cfg: None,
            candidates,
            transport,
            issues,
            metrics: Arc::new(MltMetrics::default()),
            paused: Arc::new(AtomicBool::new(true)),
            dfo_busy: Arc::new(AtomicBool::new(false)),
            run_number: 0,
            livetime: None,
            tokens: None,
            worker_clock: None,
            livetime_clock: None,
            worker: None,
        }
    }

    /// Installs clocks for the next run; tests use scripted ones. The
    /// worker clock drives buffer-timeout expiry, the livetime clock the
    /// livetime counter.
    pub fn set_clocks(
        &mut self,
        worker_clock: Box<dyn MonotonicClock>,
        livetime_clock: Box<dyn MonotonicClock>,
    ) {
        self.worker_clock = Some(worker_clock);
        self.livetime_clock = Some(livetime_clock);
    }

    pub fn configure(&mut self, params: &Value) -> Result<(), ConfigError> {
        let cfg: MltConfig = config::from_value(params)?;
        for endpoint in [
            &cfg.dfo_connection,
            &cfg.dfo_busy_connection,
            &cfg.token_connection,
        ] {
            if !self.transport.contains(endpoint) {
                return Err(ConfigError::Invalid(format!(
                    "endpoint {endpoint:?} is not declared"
                )));
            }
        }
        cfg.resolved_links()?;
        if cfg.sent_window_size == 0 {
            return Err(ConfigError::Invalid(
                "sent window size must be nonzero".into(),
            ));
        }
        self.cfg = Some(cfg);
        Ok(())
    }

    pub fn start(&mut self, run_number: RunNumber) -> Result<(), ConfigError> {
        let cfg = self
            .cfg
            .clone()
            .ok_or_else(|| ConfigError::Invalid("trigger is not configured".into()))?;
        let links = cfg.resolved_links()?;

        self.run_number = run_number;
        self.metrics = Arc::new(MltMetrics::default());
        self.paused.store(true, Ordering::SeqCst);
        self.dfo_busy.store(false, Ordering::SeqCst);

        let livetime_clock = self
            .livetime_clock
            .take()
            .unwrap_or_else(|| Box::new(SystemClock::new()));
        let livetime = Arc::new(LivetimeCounter::with_clock(
            LivetimeState::Paused,
            livetime_clock,
        ));
        let tokens = Arc::new(TokenManager::new(
            &self.name,
            cfg.initial_tokens,
            run_number,
            livetime.clone(),
            self.issues.clone(),
        ));

        self.register_inhibit_callback(&cfg, run_number, livetime.clone())?;
        self.register_token_callback(&cfg, tokens.clone())?;

        let worker_clock = self
            .worker_clock
            .take()
            .unwrap_or_else(|| Box::new(SystemClock::new()));
        let mut worker = MltWorker {
            name: self.name.clone(),
            cfg: cfg.clone(),
            links,
            run_number,
            candidates: self.candidates.clone(),
            transport: self.transport.clone(),
            issues: self.issues.clone(),
            metrics: self.metrics.clone(),
            paused: self.paused.clone(),
            dfo_busy: self.dfo_busy.clone(),
            tokens: tokens.clone(),
            pending: PendingDecisions::new(
                cfg.readout_window_map(),
                cfg.buffer_timeout,
                cfg.clock_frequency_hz,
            ),
            recently_sent: VecDeque::new(),
            last_trigger_number: 0,
            clock: worker_clock,
        };

        self.livetime = Some(livetime);
        self.tokens = Some(tokens);
        self.worker = Some(WorkerThread::spawn(&format!("{}-decisions", self.name), {
            move |running| worker.run(running)
        }));
        self.issues
            .record(&self.name, Issue::StartOfRun { run_number });
        Ok(())
    }

    fn register_inhibit_callback(
        &self,
        cfg: &MltConfig,
        run_number: RunNumber,
        livetime: Arc<LivetimeCounter>,
    ) -> Result<(), ConfigError> {
        let dfo_busy = self.dfo_busy.clone();
        let paused = self.paused.clone();
        self.transport
            .register_callback(
                &cfg.dfo_busy_connection,
                Box::new(move |frame| {
                    let Ok(inhibit) = wire::decode::<TriggerInhibit>(frame) else {
                        return;
                    };
                    if inhibit.run_number != run_number {
                        return;
                    }
                    dfo_busy.store(inhibit.busy, Ordering::SeqCst);
                    if inhibit.busy {
                        livetime.set_state(LivetimeState::Dead);
                    } else if paused.load(Ordering::SeqCst) {
                        livetime.set_state(LivetimeState::Paused);
                    } else {
                        livetime.set_state(LivetimeState::Live);
                    }
                }),
            )
            .map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    fn register_token_callback(
        &self,
        cfg: &MltConfig,
        tokens: Arc<TokenManager>,
    ) -> Result<(), ConfigError> {
        self.transport
            .register_callback(
                &cfg.token_connection,
                Box::new(move |frame| {
                    if let Ok(token) = wire::decode::<TriggerDecisionToken>(frame) {
                        tokens.receive_token(&token);
                    }
                }),
            )
            .map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    /// Stops the run. Pending decisions are flushed with the gating
    /// override before the worker exits; open in-flight triggers past the
    /// grace period are reported.
    pub fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
        if let Some(cfg) = &self.cfg {
            let _ = self.transport.clear_callback(&cfg.dfo_busy_connection);
            let _ = self.transport.clear_callback(&cfg.token_connection);
        }
        if let Some(livetime) = self.livetime.take() {
            let times = livetime.time_map_ms();
            let elapsed: u64 = times.values().sum();
            self.metrics.livetime_live_ms.store(
                times.get(&LivetimeState::Live).copied().unwrap_or(0),
                Ordering::Relaxed,
            );
            self.metrics.livetime_paused_ms.store(
                times.get(&LivetimeState::Paused).copied().unwrap_or(0),
                Ordering::Relaxed,
            );
            self.metrics.livetime_dead_ms.store(
                times.get(&LivetimeState::Dead).copied().unwrap_or(0),
                Ordering::Relaxed,
            );
            if let Some(tokens) = self.tokens.take() {
                tokens.report_open_triggers(elapsed);
            }
            self.issues.record(
                &self.name,
                Issue::RunSummary {
                    summary: format!("livetime {}", livetime.report_string()),
                },
            );
        }
        self.issues.record(
            &self.name,
            Issue::EndOfRun {
                run_number: self.run_number,
            },
        );
    }

    pub fn pause(&mut self) {
        self.paused.store(true, Ordering::SeqCst);
        if let Some(livetime) = &self.livetime {
            livetime.set_state(LivetimeState::Paused);
        }
        self.issues.record(&self.name, Issue::TriggerPaused);
    }

    pub fn resume(&mut self) {
        if let Some(livetime) = &self.livetime {
            livetime.set_state(LivetimeState::Live);
        }
        self.paused.store(false, Ordering::SeqCst);
        self.issues.record(&self.name, Issue::TriggerActive);
    }

    pub fn scrap(&mut self) {
        self.cfg = None;
    }

    pub fn info(&self) -> MltInfo {
        self.metrics.snapshot()
    }

    pub fn livetime(&self) -> Option<Arc<LivetimeCounter>> {
        self.livetime.clone()
    }

    pub fn tokens(&self) -> Option<Arc<TokenManager>> {
        self.tokens.clone()
    }
}

struct MltWorker {
    name: String,
    cfg: MltConfig,
    links: Vec<StreamId>,
    run_number: RunNumber,
    candidates: Arc<BoundedQueue<TriggerCandidate>>,
    transport: EndpointRegistry,
    issues: IssueLog,
    metrics: Arc<MltMetrics>,
    paused: Arc<AtomicBool>,
    dfo_busy: Arc<AtomicBool>,
    tokens: Arc<TokenManager>,
    pending: PendingDecisions,
    recently_sent: VecDeque<(Timestamp, Timestamp)>,
    last_trigger_number: TriggerNumber,
    clock: Box<dyn MonotonicClock>,
}

impl MltWorker {
    fn run(&mut self, running: Arc<AtomicBool>) {
        loop {
            match self.candidates.recv(DEFAULT_RECV_TIMEOUT) {
                Ok(tc) => {
                    self.metrics.tc_received.fetch_add(1, Ordering::Relaxed);
                    self.pending.absorb(tc);
                }
                Err(RecvError::Timeout) | Err(RecvError::Closed) => {
                    if !running.load(Ordering::Relaxed) {
                        break;
                    }
                }
            }
            self.poll_expired();
        }
        // End of run: drain what is still pending, bypassing pause and
        // inhibit so nothing is silently lost.
        for decision in self.pending.take_all() {
            self.emit(decision, true);
        }
        let info = self.metrics.snapshot();
        self.issues.record(
            &self.name,
            Issue::RunSummary {
                summary: format!(
                    "run {}: received {} candidates, sent {} decisions, {} paused, {} inhibited",
                    self.run_number, info.tc_received, info.td_sent, info.td_paused,
                    info.td_inhibited
                ),
            },
        );
    }

    fn poll_expired(&mut self) {
        let now_ms = self.clock.now_ms();
        for decision in self.pending.take_expired(now_ms) {
            if self.overlaps_recent(&decision) {
                self.issues.record(
                    &self.name,
                    Issue::TcOutOfTimeout {
                        time_candidate: decision.trigger_timestamp(),
                    },
                );
                if !self.cfg.td_out_of_timeout {
                    self.metrics.td_dropped_overlap.fetch_add(1, Ordering::Relaxed);
                    self.metrics.td_total.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            }
            self.emit(decision, false);
        }
    }

    fn overlaps_recent(&self, decision: &PendingDecision) -> bool {
        self.recently_sent.iter().any(|&(start, end)| {
            decision.readout_start <= end && start <= decision.readout_end
        })
    }

    fn emit(&mut self, decision: PendingDecision, bypass_gates: bool) {
        self.metrics.td_total.fetch_add(1, Ordering::Relaxed);

        if !bypass_gates {
            if self.paused.load(Ordering::SeqCst) {
                self.metrics.td_paused.fetch_add(1, Ordering::Relaxed);
                return;
            }
            if self.dfo_busy.load(Ordering::SeqCst) || !self.tokens.triggers_allowed() {
                self.issues.record(
                    &self.name,
                    Issue::TriggerInhibited {
                        run_number: self.run_number,
                    },
                );
                self.metrics.td_inhibited.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        let trigger_decision = self.build_decision(&decision);
        let frame = wire::encode(&trigger_decision);
        match self
            .transport
            .send_to(&self.cfg.dfo_connection, frame, DECISION_SEND_TIMEOUT)
        {
            Ok(()) => {
                self.tokens.trigger_sent(trigger_decision.trigger_number);
                self.last_trigger_number = trigger_decision.trigger_number;
                self.metrics.td_sent.fetch_add(1, Ordering::Relaxed);
                self.recently_sent
                    .push_back((decision.readout_start, decision.readout_end));
                while self.recently_sent.len() > self.cfg.sent_window_size {
                    self.recently_sent.pop_front();
                }
            }
            Err(_) => {
                // The decision is lost but the trigger number is not
                // consumed; the next decision reuses it.
                self.issues.record(
                    &self.name,
                    Issue::DecisionSendFailed {
                        endpoint: self.cfg.dfo_connection.clone(),
                    },
                );
                self.metrics.td_send_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn build_decision(&self, decision: &PendingDecision) -> TriggerDecision {
        let first = decision.first_contributor();
        let trigger_type = if self.cfg.hsi_trigger_type_passthrough {
            match first {
                Some(tc) if tc.kind == CandidateKind::Timing => (tc.detid & 0xff) as u16,
                Some(tc) => u16::from(tc.kind.code()) << 8,
                None => 1,
            }
        } else {
            1
        };
        TriggerDecision {
            trigger_number: self.last_trigger_number + 1,
            run_number: self.run_number,
            trigger_timestamp: decision.trigger_timestamp(),
            trigger_type,
            readout_kind: ReadoutKind::Localized,
            components: self
                .links
                .iter()
                .map(|&link| ComponentRequest {
                    component: link,
                    window_begin: decision.readout_start,
                    window_end: decision.readout_end,
                })
                .collect(),
        }
    }
}
