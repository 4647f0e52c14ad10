// 轮询状态机
// Cooperative, non-blocking poll engine multiplexing one half-duplex bus across the slave list

use crate::debug_log::{DebugEvent, DebugLog};
use crate::devices::{self, ErrorReport};
use crate::drivers::cloud::Publisher;
use crate::drivers::modbus::{ModbusTransport, PollStatus};
use crate::stats::{StatsLedger, TimingLedger};
use crate::types::{Outcome, PollingConfig, Slave};
use log::{debug, info, warn};
use serde::Serialize;
use std::rc::Rc;

/// Default spacing between consecutive queries within a cycle
pub const DEFAULT_QUERY_INTERVAL_MS: u64 = 200;

/// Topic of the debug event emitted at the end of every cycle
pub const BATCH_SEPARATOR_TOPIC: &str = "--- cycle complete ---";

pub const START_FAILED_MESSAGE: &str = "Failed to start Modbus query";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    StartQuery,
    /// Line settling before the request goes out
    Arming,
    WaitResponse,
    ProcessData,
    Waiting,
}

/// Everything a tick may touch besides the engine itself
pub struct PollContext<'a> {
    pub transport: &'a mut dyn ModbusTransport,
    pub publisher: &'a mut dyn Publisher,
    pub stats: &'a mut StatsLedger,
    pub timing: &'a mut TimingLedger,
    pub debug: &'a mut DebugLog,
}

#[derive(Debug)]
pub struct PollEngine {
    state: EngineState,
    slaves: Rc<[Slave]>,
    index: usize,
    last_action_ms: u64,
    query_start_ms: u64,
    arm_start_ms: u64,
    received: Vec<u16>,
    query_interval_ms: u64,
    settle_ms: u64,
    poll_interval_ms: u64,
    timeout_ms: u64,
    cycles: u64,
}

impl PollEngine {
    pub fn new(query_interval_ms: u64, settle_ms: u64) -> Self {
        let polling = PollingConfig::default();
        Self {
            state: EngineState::Idle,
            slaves: Rc::from(Vec::new()),
            index: 0,
            last_action_ms: 0,
            query_start_ms: 0,
            arm_start_ms: 0,
            received: Vec::new(),
            query_interval_ms,
            settle_ms,
            poll_interval_ms: polling.poll_interval_ms(),
            timeout_ms: polling.timeout_ms(),
            cycles: 0,
        }
    }

    /// Abort any transaction, install a new slave snapshot and timing, and go idle
    pub fn reset(&mut self, transport: &mut dyn ModbusTransport, slaves: Rc<[Slave]>, polling: PollingConfig) {
        if transport.in_flight() {
            info!("Reload: aborting in-flight query to slave index {}", self.index);
        }
        transport.abort();
        self.slaves = slaves;
        self.poll_interval_ms = polling.poll_interval_ms();
        self.timeout_ms = polling.timeout_ms();
        self.state = EngineState::Idle;
        self.index = 0;
        self.received.clear();
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Index of the slave being queried in the current cycle
    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn current_slave(&self) -> Option<&Slave> {
        match self.state {
            EngineState::Idle | EngineState::Waiting => None,
            _ => self.slaves.get(self.index),
        }
    }

    /// Completed cycles since start
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn slave_count(&self) -> usize {
        self.slaves.len()
    }

    pub fn poll_interval_ms(&self) -> u64 {
        self.poll_interval_ms
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Advance the state machine by at most one step
    pub fn tick(&mut self, now_ms: u64, ctx: &mut PollContext<'_>) {
        match self.state {
            EngineState::Idle => {
                if self.slaves.is_empty() {
                    return;
                }
                info!("Starting query cycle over {} slaves", self.slaves.len());
                self.begin_cycle(now_ms);
            }
            EngineState::StartQuery => {
                if now_ms.saturating_sub(self.last_action_ms) < self.query_interval_ms {
                    return;
                }
                self.last_action_ms = now_ms;
                if self.settle_ms > 0 {
                    self.arm_start_ms = now_ms;
                    self.state = EngineState::Arming;
                } else {
                    self.send_query(now_ms, ctx);
                }
            }
            EngineState::Arming => {
                if now_ms.saturating_sub(self.arm_start_ms) >= self.settle_ms {
                    self.send_query(now_ms, ctx);
                }
            }
            EngineState::WaitResponse => self.wait_response(now_ms, ctx),
            EngineState::ProcessData => self.process_data(now_ms, ctx),
            EngineState::Waiting => {
                if now_ms.saturating_sub(self.last_action_ms) >= self.poll_interval_ms {
                    debug!("Poll interval elapsed, starting new cycle");
                    self.begin_cycle(now_ms);
                }
            }
        }
    }

    fn begin_cycle(&mut self, now_ms: u64) {
        self.index = 0;
        self.last_action_ms = now_ms;
        self.state = EngineState::StartQuery;
    }

    fn slave(&self) -> Slave {
        self.slaves[self.index].clone()
    }

    fn send_query(&mut self, now_ms: u64, ctx: &mut PollContext<'_>) {
        let slave = self.slave();
        match ctx
            .transport
            .begin_transaction(slave.id, slave.start_register, slave.register_count)
        {
            Ok(()) => {
                self.query_start_ms = now_ms;
                self.state = EngineState::WaitResponse;
                debug!("Querying slave {}: {}", slave.id, slave.name);
            }
            Err(e) => {
                warn!("Failed to start query for slave {}: {}", slave.id, e);
                self.fail(now_ms, ctx, &slave, Outcome::Failure, START_FAILED_MESSAGE.to_string());
            }
        }
    }

    fn wait_response(&mut self, now_ms: u64, ctx: &mut PollContext<'_>) {
        // the deadline wins over bytes that arrived late
        if now_ms.saturating_sub(self.query_start_ms) > self.timeout_ms {
            let slave = self.slave();
            ctx.transport.abort();
            warn!("Timeout on slave {} after {} ms", slave.id, self.timeout_ms);
            let message = format!("Modbus timeout after {} ms", self.timeout_ms);
            self.fail(now_ms, ctx, &slave, Outcome::Timeout, message);
            return;
        }
        match ctx.transport.poll() {
            PollStatus::Pending => {}
            PollStatus::Complete(words) => {
                self.received = words;
                self.state = EngineState::ProcessData;
            }
            PollStatus::ProtocolError(kind) => {
                let slave = self.slave();
                warn!("Bad response from slave {}: {}", slave.id, kind);
                self.fail(now_ms, ctx, &slave, Outcome::Failure, kind.to_string());
            }
        }
    }

    fn process_data(&mut self, now_ms: u64, ctx: &mut PollContext<'_>) {
        let slave = self.slave();
        let words = std::mem::take(&mut self.received);
        match devices::decode(&slave, &words) {
            Ok(report) => {
                emit(ctx, now_ms, &slave, &report);
                ctx.stats.record(slave.id, &slave.name, Outcome::Success);
                self.advance(now_ms, ctx);
            }
            Err(e) => {
                warn!("Decode failed for slave {}: {}", slave.id, e);
                self.fail(now_ms, ctx, &slave, Outcome::Failure, e.to_string());
            }
        }
    }

    fn fail(&mut self, now_ms: u64, ctx: &mut PollContext<'_>, slave: &Slave, outcome: Outcome, message: String) {
        ctx.stats.record(slave.id, &slave.name, outcome);
        emit(ctx, now_ms, slave, &ErrorReport::new(slave, message));
        self.advance(now_ms, ctx);
    }

    /// Move to the next slave, or finish the cycle
    fn advance(&mut self, now_ms: u64, ctx: &mut PollContext<'_>) {
        self.index += 1;
        self.last_action_ms = now_ms;
        if self.index < self.slaves.len() {
            self.state = EngineState::StartQuery;
            return;
        }
        self.state = EngineState::Waiting;
        self.cycles += 1;
        info!(
            "Query cycle {} completed, waiting {} ms",
            self.cycles, self.poll_interval_ms
        );
        if ctx.debug.is_enabled() {
            ctx.debug.push(DebugEvent {
                topic: BATCH_SEPARATOR_TOPIC.to_string(),
                message: format!("Cycle {}: {} slaves", self.cycles, self.slaves.len()),
                timestamp: now_ms,
                time_delta: String::new(),
                same_device_delta: String::new(),
                real_time: ctx.timing.real_time(now_ms),
            });
        }
    }
}

/// Publish one document on the slave's topic and record its timing
fn emit<T: Serialize>(ctx: &mut PollContext<'_>, now_ms: u64, slave: &Slave, document: &T) {
    let payload = match serde_json::to_string(document) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Could not serialise report for slave {}: {}", slave.id, e);
            return;
        }
    };
    match ctx.publisher.publish(&slave.mqtt_topic, &payload) {
        Ok(()) => debug!("Published {} -> {}", slave.mqtt_topic, payload),
        Err(e) => warn!("Publish to {} dropped: {}", slave.mqtt_topic, e),
    }

    let time_delta = ctx.timing.since_any_delta(now_ms);
    let same_device_delta = ctx.timing.same_device_delta(slave.id, &slave.name, now_ms, true);
    if ctx.debug.is_enabled() {
        ctx.debug.push(DebugEvent {
            topic: slave.mqtt_topic.clone(),
            message: payload,
            timestamp: now_ms,
            time_delta,
            same_device_delta,
            real_time: ctx.timing.real_time(now_ms),
        });
    }
}
