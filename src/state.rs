use crate::status::{Status, StatusDocument};
use std::collections::BTreeMap;

/// Latest probe result per device plus cycle bookkeeping, shared with the
/// HTTP layer behind an `RwLock`.
#[derive(Debug, Clone, Default)]
pub struct State {
    pub started_at_unix: i64,
    pub last_cycle_timestamp_seconds: i64,
    pub cycles_completed: u64,
    pub hosts: BTreeMap<String, Status>,
}

impl State {
    pub fn new(started_at_unix: i64) -> Self {
        Self {
            started_at_unix,
            ..Self::default()
        }
    }

    pub fn record(&mut self, device: &str, status: Status) {
        self.hosts.insert(device.to_string(), status);
    }

    pub fn finish_cycle(&mut self, now_unix: i64) {
        self.last_cycle_timestamp_seconds = now_unix;
        self.cycles_completed += 1;
    }

    pub fn document(&self, device: &str) -> Option<StatusDocument> {
        self.hosts
            .get(device)
            .map(|status| StatusDocument::new(device, status.clone()))
    }

    pub fn documents(&self) -> Vec<StatusDocument> {
        self.hosts
            .iter()
            .map(|(device, status)| StatusDocument::new(device.as_str(), status.clone()))
            .collect()
    }

    pub fn hosts_up(&self) -> usize {
        self.hosts.values().filter(|s| s.running).count()
    }
}
