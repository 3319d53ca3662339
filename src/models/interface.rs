use serde::{Deserialize, Serialize};

/// A network interface as reported by a capture agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireInterface")]
pub struct InterfaceInfo {
    /// Device system name (used for capture operations)
    pub name: String,

    /// Addresses bound to the interface
    #[serde(default)]
    pub ips: Vec<String>,
}

/// Older agents list interfaces as bare names
#[derive(Deserialize)]
#[serde(untagged)]
enum WireInterface {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        ips: Vec<String>,
    },
}

impl From<WireInterface> for InterfaceInfo {
    fn from(wire: WireInterface) -> Self {
        match wire {
            WireInterface::Name(name) => InterfaceInfo::new(name),
            WireInterface::Detailed { name, ips } => InterfaceInfo { name, ips },
        }
    }
}

impl InterfaceInfo {
    /// Create a new interface info with just the device name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ips: Vec::new(),
        }
    }

    /// Get a formatted string with interface name and addresses (if available)
    pub fn formatted_display(&self) -> String {
        if self.ips.is_empty() {
            self.name.clone()
        } else {
            format!("{} ({})", self.name, self.ips.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_names_and_records() {
        let list: Vec<InterfaceInfo> = serde_json::from_value(json!([
            "lo",
            {"name": "eth0", "ips": ["10.0.0.2", "fe80::1"]}
        ]))
        .unwrap();
        assert_eq!(list[0], InterfaceInfo::new("lo"));
        assert_eq!(list[1].formatted_display(), "eth0 (10.0.0.2, fe80::1)");
    }
}
