// 调试消息缓冲
// Bounded ring of outbound-message events, captured only while debug mode is on

use log::debug;
use serde::Serialize;
use std::collections::VecDeque;

pub const DEBUG_RING_CAPACITY: usize = 30;

/// One captured publish (data or error)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugEvent {
    pub topic: String,
    pub message: String,
    /// Monotonic ms at capture
    pub timestamp: u64,
    /// Gap since the previous message from any slave
    pub time_delta: String,
    /// Gap since the previous message from the same slave
    pub same_device_delta: String,
    /// `HH:MM:SS` since the timing epoch
    pub real_time: String,
}

#[derive(Debug)]
pub struct DebugLog {
    enabled: bool,
    events: VecDeque<DebugEvent>,
}

impl Default for DebugLog {
    fn default() -> Self {
        Self {
            enabled: false,
            events: VecDeque::with_capacity(DEBUG_RING_CAPACITY),
        }
    }
}

impl DebugLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Append `event`, discarding the oldest entry when full. Ignored while disabled.
    pub fn push(&mut self, event: DebugEvent) {
        if !self.enabled {
            return;
        }
        debug!(
            "DEBUG [{}]: {} (Δ{}, sameΔ{})",
            event.topic, event.message, event.time_delta, event.same_device_delta
        );
        if self.events.len() == DEBUG_RING_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Take every buffered event, oldest first
    pub fn drain(&mut self) -> Vec<DebugEvent> {
        self.events.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
