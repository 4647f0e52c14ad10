// 从站统计
// Per-slave health counters with a rolling status history, plus the message timing ledger

use crate::types::Outcome;
use log::{debug, info, warn};
use serde::Serialize;

/// Default number of tracked `(id, name)` pairs
pub const DEFAULT_CAPACITY: usize = 20;
/// Slots of the rolling status history
pub const HISTORY_LEN: usize = 3;

/// Counters for one `(id, name)` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsEntry {
    pub id: u8,
    pub name: String,
    pub total: u32,
    pub successes: u32,
    pub timeouts: u32,
    pub failures: u32,
    /// Newest status first; unfilled slots are blank
    pub history: [char; HISTORY_LEN],
}

impl StatsEntry {
    fn new(id: u8, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            total: 0,
            successes: 0,
            timeouts: 0,
            failures: 0,
            history: [' '; HISTORY_LEN],
        }
    }

    fn record(&mut self, outcome: Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Success => self.successes += 1,
            Outcome::Timeout => self.timeouts += 1,
            Outcome::Failure => self.failures += 1,
        }
        self.history.rotate_right(1);
        self.history[0] = outcome.status_char();
    }

    pub fn history_string(&self) -> String {
        self.history.iter().collect()
    }
}

/// Wire form of one entry in the statistics view
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsView {
    pub slave_id: u8,
    pub slave_name: String,
    pub total_queries: u32,
    pub success: u32,
    pub timeout: u32,
    pub failed: u32,
    pub status_history: String,
}

impl From<&StatsEntry> for StatsView {
    fn from(entry: &StatsEntry) -> Self {
        Self {
            slave_id: entry.id,
            slave_name: entry.name.clone(),
            total_queries: entry.total,
            success: entry.successes,
            timeout: entry.timeouts,
            failed: entry.failures,
            status_history: entry.history_string(),
        }
    }
}

/// Bounded, ordered set of [`StatsEntry`]. Survives registry reloads.
#[derive(Debug)]
pub struct StatsLedger {
    entries: Vec<StatsEntry>,
    capacity: usize,
}

impl Default for StatsLedger {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl StatsLedger {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Find-or-create the entry and count `outcome`. New pairs beyond capacity are dropped.
    pub fn record(&mut self, id: u8, name: &str, outcome: Outcome) {
        if id == 0 || name.is_empty() {
            return;
        }
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id && e.name == name) {
            entry.record(outcome);
            return;
        }
        if self.entries.len() >= self.capacity {
            debug!("Stats ledger full, not tracking slave {} ({})", id, name);
            return;
        }
        let mut entry = StatsEntry::new(id, name);
        entry.record(outcome);
        self.entries.push(entry);
    }

    /// Drop one entry; the remaining entries keep their order
    pub fn remove(&mut self, id: u8, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !(e.id == id && e.name == name));
        let removed = self.entries.len() != before;
        if removed {
            info!("Removed statistics for slave {}: {}", id, name);
        }
        removed
    }

    pub fn get(&self, id: u8, name: &str) -> Option<&StatsEntry> {
        self.entries.iter().find(|e| e.id == id && e.name == name)
    }

    pub fn entries(&self) -> &[StatsEntry] {
        &self.entries
    }

    pub fn snapshot(&self) -> Vec<StatsView> {
        self.entries.iter().map(StatsView::from).collect()
    }
}

#[derive(Debug, Clone)]
struct DeviceTiming {
    id: u8,
    name: String,
    last_seen_ms: u64,
    first: bool,
    message_count: u32,
}

/// Inter-message timing for the debug view
#[derive(Debug)]
pub struct TimingLedger {
    devices: Vec<DeviceTiming>,
    capacity: usize,
    last_sequence_ms: Option<u64>,
    epoch_ms: u64,
}

impl TimingLedger {
    pub fn new(epoch_ms: u64) -> Self {
        Self {
            devices: Vec::with_capacity(DEFAULT_CAPACITY),
            capacity: DEFAULT_CAPACITY,
            last_sequence_ms: None,
            epoch_ms,
        }
    }

    /// Gap since this slave's previous message; `"First"` the first time.
    /// With `reset`, the slave's last-seen time moves to `now_ms`.
    pub fn same_device_delta(&mut self, id: u8, name: &str, now_ms: u64, reset: bool) -> String {
        if let Some(device) = self.devices.iter_mut().find(|d| d.id == id && d.name == name) {
            let delta = now_ms.saturating_sub(device.last_seen_ms);
            let was_first = device.first;
            if reset {
                device.first = false;
                device.last_seen_ms = now_ms;
                device.message_count += 1;
            }
            return if was_first {
                "First".to_string()
            } else {
                format_delta(delta)
            };
        }
        if self.devices.len() >= self.capacity {
            warn!("Timing ledger full, no delta for slave {} ({})", id, name);
            return format_delta(0);
        }
        self.devices.push(DeviceTiming {
            id,
            name: name.to_string(),
            last_seen_ms: now_ms,
            first: !reset,
            message_count: u32::from(reset),
        });
        "First".to_string()
    }

    /// Gap since the previous message from any slave; advances the sequence clock
    pub fn since_any_delta(&mut self, now_ms: u64) -> String {
        let delta = self
            .last_sequence_ms
            .map_or(0, |last| now_ms.saturating_sub(last));
        self.last_sequence_ms = Some(now_ms);
        format_delta(delta)
    }

    /// Messages seen for one slave since the last reset
    pub fn message_count(&self, id: u8, name: &str) -> u32 {
        self.devices
            .iter()
            .find(|d| d.id == id && d.name == name)
            .map_or(0, |d| d.message_count)
    }

    /// Forget every device and restart the epoch at `now_ms`
    pub fn reset_all(&mut self, now_ms: u64) {
        self.devices.clear();
        self.last_sequence_ms = None;
        self.epoch_ms = now_ms;
        info!("All timing data reset");
    }

    /// `HH:MM:SS` since the epoch, hours wrapping daily
    pub fn real_time(&self, now_ms: u64) -> String {
        let seconds = now_ms.saturating_sub(self.epoch_ms) / 1000;
        format!(
            "{:02}:{:02}:{:02}",
            (seconds % 86_400) / 3600,
            (seconds % 3600) / 60,
            seconds % 60
        )
    }
}

/// `+Nms` below one second, `+N.Ns` above
pub fn format_delta(delta_ms: u64) -> String {
    if delta_ms < 1000 {
        format!("+{}ms", delta_ms)
    } else {
        format!("+{:.1}s", delta_ms as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_newest_first() {
        let mut ledger = StatsLedger::default();
        ledger.record(3, "Room", Outcome::Success);
        assert_eq!(ledger.get(3, "Room").unwrap().history_string(), "S  ");
        ledger.record(3, "Room", Outcome::Timeout);
        ledger.record(3, "Room", Outcome::Failure);
        ledger.record(3, "Room", Outcome::Success);
        let entry = ledger.get(3, "Room").unwrap();
        assert_eq!(entry.history_string(), "SFT");
        assert_eq!(entry.total, 4);
        assert_eq!(entry.total, entry.successes + entry.timeouts + entry.failures);
    }

    #[test]
    fn full_ledger_still_updates_existing_entries() {
        let mut ledger = StatsLedger::with_capacity(2);
        ledger.record(1, "a", Outcome::Success);
        ledger.record(2, "b", Outcome::Success);
        ledger.record(3, "c", Outcome::Success);
        assert!(ledger.get(3, "c").is_none());
        ledger.record(2, "b", Outcome::Timeout);
        assert_eq!(ledger.get(2, "b").unwrap().timeouts, 1);
        assert_eq!(ledger.entries().len(), 2);
    }

    #[test]
    fn same_id_different_name_is_a_separate_entry() {
        let mut ledger = StatsLedger::default();
        ledger.record(5, "Left", Outcome::Success);
        ledger.record(5, "Right", Outcome::Failure);
        assert_eq!(ledger.entries().len(), 2);
        assert!(ledger.remove(5, "Left"));
        assert!(!ledger.remove(5, "Left"));
        assert_eq!(ledger.entries()[0].name, "Right");
    }

    #[test]
    fn snapshot_uses_wire_names() {
        let mut ledger = StatsLedger::default();
        ledger.record(3, "Room", Outcome::Timeout);
        let json = serde_json::to_value(ledger.snapshot()).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{
                "slaveId": 3, "slaveName": "Room", "totalQueries": 1,
                "success": 0, "timeout": 1, "failed": 0, "statusHistory": "T  "
            }])
        );
    }

    #[test]
    fn delta_formatting() {
        assert_eq!(format_delta(0), "+0ms");
        assert_eq!(format_delta(250), "+250ms");
        assert_eq!(format_delta(1500), "+1.5s");
        assert_eq!(format_delta(10_049), "+10.0s");
    }

    #[test]
    fn same_device_delta_reports_first_then_gap() {
        let mut timing = TimingLedger::new(0);
        assert_eq!(timing.same_device_delta(3, "Room", 1_000, true), "First");
        assert_eq!(timing.same_device_delta(3, "Room", 1_200, true), "+200ms");
        assert_eq!(timing.same_device_delta(3, "Room", 3_700, false), "+2.5s");
        assert_eq!(timing.same_device_delta(3, "Room", 3_800, true), "+2.6s");
        assert_eq!(timing.message_count(3, "Room"), 3);
    }

    #[test]
    fn since_any_delta_tracks_all_devices() {
        let mut timing = TimingLedger::new(0);
        assert_eq!(timing.since_any_delta(500), "+0ms");
        assert_eq!(timing.since_any_delta(700), "+200ms");
        timing.reset_all(800);
        assert_eq!(timing.since_any_delta(900), "+0ms");
    }

    #[test]
    fn real_time_counts_from_epoch() {
        let mut timing = TimingLedger::new(1_000);
        assert_eq!(timing.real_time(1_000 + 3_723_000), "01:02:03");
        timing.reset_all(5_000);
        assert_eq!(timing.real_time(6_999), "00:00:01");
    }
}
