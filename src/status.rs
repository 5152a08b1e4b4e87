use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Result of one unit check on a host.
///
/// `running` means the check produced a section, not that the unit is healthy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStatus {
    pub name: String,
    pub running: bool,
    pub status: String,
}

/// Result of one probe of one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub timestamp: i64,
    pub running: bool,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub uptime: String,
    #[serde(default, rename = "filesystem")]
    pub file_system: String,
    #[serde(default)]
    pub memory: String,
    #[serde(default)]
    pub units: Vec<UnitStatus>,
}

impl Status {
    pub fn failed(timestamp: i64, error: impl Into<String>) -> Self {
        Self {
            timestamp,
            running: false,
            error: error.into(),
            uptime: String::new(),
            file_system: String::new(),
            memory: String::new(),
            units: Vec::new(),
        }
    }

    pub fn succeeded(
        timestamp: i64,
        uptime: String,
        file_system: String,
        memory: String,
        units: Vec<UnitStatus>,
    ) -> Self {
        Self {
            timestamp,
            running: true,
            error: String::new(),
            uptime,
            file_system,
            memory,
            units,
        }
    }
}

/// What a sink receives: the device key next to its latest status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDocument {
    pub device: String,
    pub status: Status,
}

impl StatusDocument {
    pub fn new(device: impl Into<String>, status: Status) -> Self {
        Self {
            device: device.into(),
            status,
        }
    }
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
