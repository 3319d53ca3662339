use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::utils::error::{AppError, AppResult};

/// Direction qualifier for host/port/MAC predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Src,
    Dst,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Src => "src",
            Direction::Dst => "dst",
        }
    }
}

impl FromStr for Direction {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "src" => Ok(Direction::Src),
            "dst" => Ok(Direction::Dst),
            other => Err(AppError::Validation(format!("Unknown direction '{}', expected src or dst", other))),
        }
    }
}

/// Protocols selectable in a protocol rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Arp,
    Ip,
    Ipv6,
    Http,
    Https,
    Dns,
}

impl Protocol {
    pub const ALL: [Protocol; 9] = [
        Protocol::Tcp,
        Protocol::Udp,
        Protocol::Icmp,
        Protocol::Arp,
        Protocol::Ip,
        Protocol::Ipv6,
        Protocol::Http,
        Protocol::Https,
        Protocol::Dns,
    ];

    /// Lowercase name, which is also the BPF primitive emitted for it
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
            Protocol::Arp => "arp",
            Protocol::Ip => "ip",
            Protocol::Ipv6 => "ipv6",
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Dns => "dns",
        }
    }
}

impl FromStr for Protocol {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        let wanted = s.trim().to_lowercase();
        Protocol::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| AppError::Validation(format!("Unknown protocol '{}'", s)))
    }
}

/// Comparison applied by a rule. Only equality exists today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleOperator {
    #[default]
    Equals,
}

/// Joins a rule to the one before it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

impl LogicalOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalOperator::And => "and",
            LogicalOperator::Or => "or",
        }
    }
}

/// Anything other than "or" joins with "and"
fn lenient_logical_operator<'de, D>(deserializer: D) -> Result<Option<LogicalOperator>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.map(|op| {
        if op.trim().eq_ignore_ascii_case("or") {
            LogicalOperator::Or
        } else {
            LogicalOperator::And
        }
    }))
}

/// Identifier of a rule: a creation-time millisecond timestamp that is
/// bumped when needed so ids handed out by one process strictly increase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub u64);

impl RuleId {
    pub fn next() -> Self {
        static LAST: AtomicU64 = AtomicU64::new(0);
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let previous = LAST
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
            .unwrap_or(now);
        RuleId(now.max(previous + 1))
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a rule matches on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Host { direction: Direction, value: String },
    Port { direction: Direction, value: String },
    Protocol(Protocol),
    Mac { direction: Direction, value: String },
}

impl Predicate {
    pub fn kind(&self) -> &'static str {
        match self {
            Predicate::Host { .. } => "ip",
            Predicate::Port { .. } => "port",
            Predicate::Protocol(_) => "protocol",
            Predicate::Mac { .. } => "mac",
        }
    }
}

/// One atomic predicate of a filter expression.
///
/// On the wire a rule is a flat record (`kind`, `sub_kind`, `value`, ...);
/// parsing goes through [`RawFilterRule`] so an unknown kind or a missing
/// value is rejected before the rule exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawFilterRule", into = "RawFilterRule")]
pub struct FilterRule {
    pub id: RuleId,
    pub predicate: Predicate,
    pub operator: RuleOperator,
    pub logical_operator: Option<LogicalOperator>,
}

impl FilterRule {
    pub fn new(predicate: Predicate) -> AppResult<Self> {
        let rule = Self {
            id: RuleId::next(),
            predicate,
            operator: RuleOperator::Equals,
            logical_operator: None,
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn host(direction: Direction, value: impl Into<String>) -> AppResult<Self> {
        Self::new(Predicate::Host { direction, value: value.into() })
    }

    pub fn port(direction: Direction, value: impl Into<String>) -> AppResult<Self> {
        Self::new(Predicate::Port { direction, value: value.into() })
    }

    pub fn protocol(protocol: Protocol) -> AppResult<Self> {
        Self::new(Predicate::Protocol(protocol))
    }

    pub fn mac(direction: Direction, value: impl Into<String>) -> AppResult<Self> {
        Self::new(Predicate::Mac { direction, value: value.into() })
    }

    pub fn joined_by(mut self, op: LogicalOperator) -> Self {
        self.logical_operator = Some(op);
        self
    }

    /// Host, port and MAC rules need a value
    pub fn validate(&self) -> AppResult<()> {
        let value = match &self.predicate {
            Predicate::Host { value, .. } | Predicate::Port { value, .. } | Predicate::Mac { value, .. } => value,
            Predicate::Protocol(_) => return Ok(()),
        };
        if value.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "A {} rule requires a value",
                self.predicate.kind()
            )));
        }
        Ok(())
    }

    /// Short human-readable label, e.g. "src port equals 80"
    pub fn display(&self) -> String {
        match &self.predicate {
            Predicate::Host { direction, value } => format!("{} IP equals {}", direction.as_str(), value),
            Predicate::Port { direction, value } => format!("{} port equals {}", direction.as_str(), value),
            Predicate::Protocol(p) => format!("protocol equals {}", p.as_str()),
            Predicate::Mac { direction, value } => format!("{} MAC equals {}", direction.as_str(), value),
        }
    }
}

/// Flat wire/storage form of a [`FilterRule`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFilterRule {
    #[serde(default)]
    pub id: Option<RuleId>,
    pub kind: String,
    pub sub_kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub operator: RuleOperator,
    #[serde(
        default,
        deserialize_with = "lenient_logical_operator",
        skip_serializing_if = "Option::is_none"
    )]
    pub logical_operator: Option<LogicalOperator>,
}

impl TryFrom<RawFilterRule> for FilterRule {
    type Error = AppError;

    fn try_from(raw: RawFilterRule) -> AppResult<Self> {
        let value = raw.value.unwrap_or_default();
        let predicate = match raw.kind.trim().to_lowercase().as_str() {
            "ip" => Predicate::Host { direction: raw.sub_kind.parse()?, value },
            "port" => Predicate::Port { direction: raw.sub_kind.parse()?, value },
            "protocol" => Predicate::Protocol(raw.sub_kind.parse()?),
            "mac" => Predicate::Mac { direction: raw.sub_kind.parse()?, value },
            other => {
                return Err(AppError::Validation(format!(
                    "Unknown rule kind '{}', expected ip, port, protocol or mac",
                    other
                )))
            }
        };

        let rule = FilterRule {
            id: raw.id.unwrap_or_else(RuleId::next),
            predicate,
            operator: raw.operator,
            logical_operator: raw.logical_operator,
        };
        rule.validate()?;
        Ok(rule)
    }
}

impl From<FilterRule> for RawFilterRule {
    fn from(rule: FilterRule) -> Self {
        let kind = rule.predicate.kind().to_string();
        let (sub_kind, value) = match rule.predicate {
            Predicate::Host { direction, value }
            | Predicate::Port { direction, value }
            | Predicate::Mac { direction, value } => (direction.as_str().to_string(), Some(value)),
            Predicate::Protocol(p) => (p.as_str().to_string(), None),
        };
        RawFilterRule {
            id: Some(rule.id),
            kind,
            sub_kind,
            value,
            operator: rule.operator,
            logical_operator: rule.logical_operator,
        }
    }
}

/// Ordered rules, compiled left to right without precedence
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<FilterRule>", into = "Vec<FilterRule>")]
pub struct FilterExpression {
    rules: Vec<FilterRule>,
}

impl FilterExpression {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule. The first rule never carries a logical operator;
    /// later rules default to `and` when none was chosen.
    pub fn push(&mut self, mut rule: FilterRule) -> AppResult<()> {
        rule.validate()?;
        if self.rules.iter().any(|r| r.id == rule.id) {
            return Err(AppError::Validation(format!("Duplicate rule id {}", rule.id)));
        }
        if self.rules.is_empty() {
            rule.logical_operator = None;
        } else if rule.logical_operator.is_none() {
            rule.logical_operator = Some(LogicalOperator::And);
        }
        self.rules.push(rule);
        Ok(())
    }

    pub fn with(mut self, rule: FilterRule) -> AppResult<Self> {
        self.push(rule)?;
        Ok(self)
    }

    /// Remove a rule by id. If the head is removed, the new head loses its
    /// logical operator.
    pub fn remove(&mut self, id: RuleId) -> Option<FilterRule> {
        let index = self.rules.iter().position(|r| r.id == id)?;
        let removed = self.rules.remove(index);
        if let Some(head) = self.rules.first_mut() {
            head.logical_operator = None;
        }
        Some(removed)
    }

    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl TryFrom<Vec<FilterRule>> for FilterExpression {
    type Error = AppError;

    fn try_from(rules: Vec<FilterRule>) -> AppResult<Self> {
        let mut expr = FilterExpression::new();
        for rule in rules {
            expr.push(rule)?;
        }
        Ok(expr)
    }
}

impl From<FilterExpression> for Vec<FilterRule> {
    fn from(expr: FilterExpression) -> Self {
        expr.rules
    }
}

/// Either a structured expression or a hand-written BPF string.
///
/// Untagged on the wire: a JSON array is structured, a JSON string is raw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FilterSpec {
    Raw(String),
    Structured(FilterExpression),
}

// Picks the variant from the JSON shape so rule errors reach the caller
// instead of a generic "no variant matched".
impl<'de> Deserialize<'de> for FilterSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::String(raw) => Ok(FilterSpec::Raw(raw)),
            rules @ Value::Array(_) => serde_json::from_value(rules)
                .map(FilterSpec::Structured)
                .map_err(D::Error::custom),
            other => Err(D::Error::custom(format!(
                "expected a BPF string or a list of rules, got {}",
                other
            ))),
        }
    }
}

impl FilterSpec {
    pub fn raw(filter: impl Into<String>) -> Self {
        FilterSpec::Raw(filter.into())
    }

    /// Short label for status displays
    pub fn summary(&self) -> String {
        match self {
            FilterSpec::Raw(s) if s.chars().count() > 20 => {
                format!("BPF: {}...", s.chars().take(20).collect::<String>())
            }
            FilterSpec::Raw(s) => format!("BPF: {}", s),
            FilterSpec::Structured(expr) => format!("{} rule(s) active", expr.len()),
        }
    }
}

impl From<FilterExpression> for FilterSpec {
    fn from(expr: FilterExpression) -> Self {
        FilterSpec::Structured(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rule_ids_strictly_increase() {
        let a = RuleId::next();
        let b = RuleId::next();
        let c = RuleId::next();
        assert!(a < b && b < c);
    }

    #[test]
    fn value_required_for_host_port_mac() {
        assert!(matches!(FilterRule::host(Direction::Src, ""), Err(AppError::Validation(_))));
        assert!(matches!(FilterRule::port(Direction::Dst, "  "), Err(AppError::Validation(_))));
        assert!(matches!(FilterRule::mac(Direction::Src, ""), Err(AppError::Validation(_))));
        assert!(FilterRule::protocol(Protocol::Tcp).is_ok());
    }

    #[test]
    fn first_rule_never_carries_operator() {
        let rule = FilterRule::protocol(Protocol::Tcp).unwrap().joined_by(LogicalOperator::Or);
        let expr = FilterExpression::new().with(rule).unwrap();
        assert_eq!(expr.rules()[0].logical_operator, None);
    }

    #[test]
    fn later_rules_default_to_and() {
        let expr = FilterExpression::new()
            .with(FilterRule::protocol(Protocol::Tcp).unwrap())
            .unwrap()
            .with(FilterRule::port(Direction::Dst, "80").unwrap())
            .unwrap();
        assert_eq!(expr.rules()[1].logical_operator, Some(LogicalOperator::And));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let rule = FilterRule::protocol(Protocol::Udp).unwrap();
        let mut expr = FilterExpression::new();
        expr.push(rule.clone()).unwrap();
        assert!(matches!(expr.push(rule), Err(AppError::Validation(_))));
    }

    #[test]
    fn removing_head_clears_new_head_operator() {
        let first = FilterRule::protocol(Protocol::Tcp).unwrap();
        let first_id = first.id;
        let mut expr = FilterExpression::new()
            .with(first)
            .unwrap()
            .with(FilterRule::protocol(Protocol::Udp).unwrap().joined_by(LogicalOperator::Or))
            .unwrap();
        expr.remove(first_id).unwrap();
        assert_eq!(expr.len(), 1);
        assert_eq!(expr.rules()[0].logical_operator, None);
    }

    #[test]
    fn parses_wire_rules() {
        let expr: FilterExpression = serde_json::from_value(json!([
            {"id": 1, "kind": "ip", "sub_kind": "src", "value": "10.0.0.5", "operator": "equals"},
            {"id": 2, "kind": "protocol", "sub_kind": "TCP", "logical_operator": "or"}
        ]))
        .unwrap();
        assert_eq!(expr.len(), 2);
        assert_eq!(expr.rules()[1].predicate, Predicate::Protocol(Protocol::Tcp));
        assert_eq!(expr.rules()[1].logical_operator, Some(LogicalOperator::Or));
    }

    #[test]
    fn malformed_logical_operator_means_and() {
        let expr: FilterExpression = serde_json::from_value(json!([
            {"kind": "protocol", "sub_kind": "tcp"},
            {"kind": "protocol", "sub_kind": "udp", "logical_operator": "xor"}
        ]))
        .unwrap();
        assert_eq!(expr.rules()[1].logical_operator, Some(LogicalOperator::And));
    }

    #[test]
    fn unknown_kind_fails_fast() {
        let err = serde_json::from_value::<FilterExpression>(json!([
            {"kind": "vlan", "sub_kind": "src", "value": "10"}
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("Unknown rule kind"));
    }

    #[test]
    fn spec_parse_reports_rule_error() {
        let err = serde_json::from_value::<FilterSpec>(json!([
            {"kind": "vlan", "sub_kind": "src", "value": "10"}
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("Unknown rule kind 'vlan'"), "{}", err);
    }

    #[test]
    fn missing_value_rejected_on_parse() {
        assert!(serde_json::from_value::<FilterRule>(json!({"kind": "mac", "sub_kind": "dst"})).is_err());
    }

    #[test]
    fn spec_picks_variant_by_json_shape() {
        let raw: FilterSpec = serde_json::from_value(json!("tcp port 80")).unwrap();
        assert_eq!(raw, FilterSpec::raw("tcp port 80"));

        let structured: FilterSpec =
            serde_json::from_value(json!([{"kind": "protocol", "sub_kind": "dns"}])).unwrap();
        assert!(matches!(structured, FilterSpec::Structured(ref e) if e.len() == 1));

        assert!(serde_json::from_value::<FilterSpec>(json!(42)).is_err());

        let back = serde_json::to_value(&structured).unwrap();
        assert_eq!(back[0]["kind"], "protocol");
        assert_eq!(back[0]["sub_kind"], "dns");
        assert!(back[0].get("logical_operator").is_none());
    }

    #[test]
    fn summary_truncates_long_raw_filters() {
        let spec = FilterSpec::raw("tcp port 80 and host 192.168.100.200");
        assert_eq!(spec.summary(), "BPF: tcp port 80 and host...");
    }
}
