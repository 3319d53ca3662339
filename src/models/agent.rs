use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::filter::compiler;
use crate::models::filter::FilterSpec;
use crate::models::interface::InterfaceInfo;

/// Capture lifecycle state driven by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    #[default]
    Idle,
    Capturing,
    Error,
}

impl CaptureState {
    /// Agents and the directory use free-form status strings
    /// ("online", "offline", ...); anything unrecognised counts as idle.
    pub fn from_reported(status: &str) -> Self {
        match status.trim().to_lowercase().as_str() {
            "capturing" => CaptureState::Capturing,
            "error" => CaptureState::Error,
            _ => CaptureState::Idle,
        }
    }
}

/// Status shown to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Capturing,
    Error,
    Disconnected,
}

/// Status payload of an agent's `GET /status`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObservedStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub interface: String,
    #[serde(default)]
    pub interfaces: Vec<InterfaceInfo>,
    #[serde(default)]
    pub packets_captured: u64,
    #[serde(default = "default_connected")]
    pub connected: bool,
    #[serde(default)]
    pub active_filter: Option<String>,
}

fn default_connected() -> bool {
    true
}

impl ObservedStatus {
    pub fn state(&self) -> CaptureState {
        CaptureState::from_reported(&self.status)
    }
}

/// Agent record as listed by the directory server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryAgent {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub url: String,
    #[serde(default, alias = "active_interface")]
    pub interface: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<InterfaceInfo>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub uptime: Option<String>,
    #[serde(default, alias = "last_seen")]
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl DirectoryAgent {
    /// The directory keys agents by name when it gives no id
    pub fn agent_id(&self) -> String {
        match &self.id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => self.name.clone(),
        }
    }
}

/// Locally held state of one remote capture agent
#[derive(Debug, Clone, Default)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub url: String,
    pub interface: Option<String>,
    pub interfaces: Vec<InterfaceInfo>,
    pub state: CaptureState,
    pub connected: bool,
    pub packets_captured: u64,
    pub active_filter: Option<FilterSpec>,
    pub error: Option<String>,
    pub hostname: Option<String>,
    pub os: Option<String>,
    pub uptime: Option<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn new(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            connected: true,
            ..Default::default()
        }
    }

    pub fn from_directory(record: &DirectoryAgent) -> Self {
        let reported = record.status.clone().unwrap_or_default();
        let mut agent = Agent::new(record.agent_id(), record.name.clone(), record.url.clone());
        agent.state = CaptureState::from_reported(&reported);
        agent.connected = !matches!(reported.as_str(), "offline" | "disconnected");
        agent.interface = record.interface.clone().filter(|i| !i.is_empty());
        agent.interfaces = record.interfaces.clone();
        agent.update_descriptor(record);
        agent
    }

    /// Refresh the descriptive fields owned by the directory
    pub fn update_descriptor(&mut self, record: &DirectoryAgent) {
        self.name = record.name.clone();
        self.url = record.url.clone();
        self.hostname = record.hostname.clone();
        self.os = record.os.clone();
        self.uptime = record.uptime.clone();
        self.last_heartbeat = record.last_heartbeat;
    }

    pub fn status(&self) -> AgentStatus {
        if !self.connected {
            return AgentStatus::Disconnected;
        }
        match self.state {
            CaptureState::Idle => AgentStatus::Idle,
            CaptureState::Capturing => AgentStatus::Capturing,
            CaptureState::Error => AgentStatus::Error,
        }
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            url: self.url.clone(),
            interface: self.interface.clone(),
            interfaces: self.interfaces.iter().map(|i| i.name.clone()).collect(),
            interface_labels: self.interfaces.iter().map(InterfaceInfo::formatted_display).collect(),
            interface_details: self.interfaces.clone(),
            status: self.status(),
            packets_captured: self.packets_captured,
            active_filter: self.active_filter.clone(),
            active_filter_bpf: self.active_filter.as_ref().and_then(compiler::resolve),
            error: self.error.clone().unwrap_or_default(),
            hostname: self.hostname.clone(),
            os: self.os.clone(),
            uptime: self.uptime.clone(),
            last_heartbeat: self.last_heartbeat,
        }
    }
}

/// Serializable view of an agent handed to API clients
#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    pub id: String,
    pub name: String,
    pub url: String,
    pub interface: Option<String>,
    pub interfaces: Vec<String>,
    /// `name (ip, ip)` for selection lists
    pub interface_labels: Vec<String>,
    pub interface_details: Vec<InterfaceInfo>,
    pub status: AgentStatus,
    pub packets_captured: u64,
    pub active_filter: Option<FilterSpec>,
    pub active_filter_bpf: Option<String>,
    pub error: String,
    pub hostname: Option<String>,
    pub os: Option<String>,
    pub uptime: Option<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn disconnected_overrides_capture_state() {
        let mut agent = Agent::new("a1", "lab", "http://10.0.0.7:8090");
        agent.state = CaptureState::Capturing;
        assert_eq!(agent.status(), AgentStatus::Capturing);
        agent.connected = false;
        assert_eq!(agent.status(), AgentStatus::Disconnected);
    }

    #[test]
    fn directory_record_without_id_uses_name() {
        let record: DirectoryAgent = serde_json::from_value(json!({
            "name": "edge-1",
            "url": "http://edge-1:8090",
            "status": "offline",
            "active_interface": "eth0",
            "interfaces": ["eth0", "lo"],
            "last_seen": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        let agent = Agent::from_directory(&record);
        assert_eq!(agent.id, "edge-1");
        assert_eq!(agent.interface.as_deref(), Some("eth0"));
        assert_eq!(agent.status(), AgentStatus::Disconnected);
        assert!(agent.last_heartbeat.is_some());
    }

    #[test]
    fn observed_status_defaults() {
        let observed: ObservedStatus = serde_json::from_value(json!({
            "status": "capturing",
            "packets_captured": 42
        }))
        .unwrap();
        assert_eq!(observed.state(), CaptureState::Capturing);
        assert!(observed.connected);
        assert!(observed.interfaces.is_empty());
    }

    #[test]
    fn snapshot_renders_compiled_filter() {
        let mut agent = Agent::new("a1", "lab", "http://lab:8090");
        agent.active_filter = Some(FilterSpec::raw("udp port 53"));
        let snap = serde_json::to_value(agent.snapshot()).unwrap();
        assert_eq!(snap["status"], "idle");
        assert_eq!(snap["active_filter"], "udp port 53");
        assert_eq!(snap["active_filter_bpf"], "udp port 53");
        assert_eq!(snap["error"], "");
    }

    #[test]
    fn snapshot_labels_interfaces_with_addresses() {
        let mut agent = Agent::new("a1", "lab", "http://lab:8090");
        agent.interfaces = vec![
            InterfaceInfo::new("lo"),
            InterfaceInfo { name: "eth0".into(), ips: vec!["10.0.0.2".into()] },
        ];
        let snap = agent.snapshot();
        assert_eq!(snap.interfaces, vec!["lo", "eth0"]);
        assert_eq!(snap.interface_labels, vec!["lo", "eth0 (10.0.0.2)"]);
    }
}
