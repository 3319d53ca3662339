use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::models::filter::FilterSpec;

/// Storage key holding presets visible to every agent
pub const GLOBAL_PRESETS_KEY: &str = "savedNetworkFilters";

/// Prefix of the per-agent preset keys
pub const AGENT_PRESETS_PREFIX: &str = "savedFilters_agent_";

/// Where a preset lives: one agent, or every agent
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PresetScope {
    Global,
    Agent(String),
}

impl PresetScope {
    pub fn for_agent(agent_id: Option<&str>) -> Self {
        match agent_id {
            Some(id) if !id.is_empty() => PresetScope::Agent(id.to_string()),
            _ => PresetScope::Global,
        }
    }

    pub fn storage_key(&self) -> String {
        match self {
            PresetScope::Global => GLOBAL_PRESETS_KEY.to_string(),
            PresetScope::Agent(id) => format!("{}{}", AGENT_PRESETS_PREFIX, id),
        }
    }
}

impl fmt::Display for PresetScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresetScope::Global => write!(f, "global"),
            PresetScope::Agent(id) => write!(f, "agent:{}", id),
        }
    }
}

impl Serialize for PresetScope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PresetScope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw == "global" {
            return Ok(PresetScope::Global);
        }
        match raw.strip_prefix("agent:") {
            Some(id) if !id.is_empty() => Ok(PresetScope::Agent(id.to_string())),
            _ => Err(D::Error::custom(format!(
                "invalid preset scope '{}', expected 'global' or 'agent:<id>'",
                raw
            ))),
        }
    }
}

/// A named, saved filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterPreset {
    pub id: String,
    pub name: String,
    pub scope: PresetScope,
    pub spec: FilterSpec,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_keys() {
        assert_eq!(PresetScope::Global.storage_key(), "savedNetworkFilters");
        assert_eq!(
            PresetScope::Agent("edge-1".into()).storage_key(),
            "savedFilters_agent_edge-1"
        );
        assert_eq!(PresetScope::for_agent(Some("")), PresetScope::Global);
    }

    #[test]
    fn agent_named_global_stays_an_agent() {
        let agent = PresetScope::Agent("global".into());
        let json = serde_json::to_value(&agent).unwrap();
        assert_eq!(json, "agent:global");
        let back: PresetScope = serde_json::from_value(json).unwrap();
        assert_eq!(back, agent);
        assert_ne!(back, PresetScope::Global);

        let global: PresetScope = serde_json::from_str(r#""global""#).unwrap();
        assert_eq!(global, PresetScope::Global);
        assert!(serde_json::from_str::<PresetScope>(r#""edge-1""#).is_err());
        assert!(serde_json::from_str::<PresetScope>(r#""agent:""#).is_err());
    }

    #[test]
    fn preset_requires_spec_field() {
        let preset: FilterPreset = serde_json::from_str(
            r#"{"id":"1","name":"web","scope":"agent:edge-1","spec":"tcp port 80"}"#,
        )
        .unwrap();
        assert_eq!(preset.spec, FilterSpec::raw("tcp port 80"));
        assert_eq!(preset.scope, PresetScope::Agent("edge-1".into()));

        let legacy = serde_json::from_str::<FilterPreset>(
            r#"{"id":"1","name":"web","scope":"global","filters":"tcp port 80"}"#,
        );
        assert!(legacy.is_err());
    }
}
