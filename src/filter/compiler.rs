//! Translation of structured filters into BPF capture syntax.
//!
//! Every caller that sends a filter to an agent goes through [`resolve`].

use crate::models::filter::{FilterExpression, FilterRule, FilterSpec, LogicalOperator, Predicate};

/// Compile an expression into a BPF string.
///
/// Rules are joined left to right with their logical operator and no
/// grouping, so `a or b and c` reaches the capture engine exactly as written.
/// Values are not checked here; the capture engine rejects bad ones when it
/// compiles the program.
pub fn compile(expr: &FilterExpression) -> String {
    let mut bpf = String::new();
    for (index, rule) in expr.rules().iter().enumerate() {
        if index > 0 {
            let op = rule.logical_operator.unwrap_or(LogicalOperator::And);
            bpf.push(' ');
            bpf.push_str(op.as_str());
            bpf.push(' ');
        }
        bpf.push_str(&fragment(rule));
    }
    bpf
}

fn fragment(rule: &FilterRule) -> String {
    match &rule.predicate {
        Predicate::Host { direction, value } => format!("{} host {}", direction.as_str(), value),
        Predicate::Port { direction, value } => format!("{} port {}", direction.as_str(), value),
        Predicate::Protocol(protocol) => protocol.as_str().to_string(),
        Predicate::Mac { direction, value } => format!("ether {} {}", direction.as_str(), value),
    }
}

/// The `filter` field to send for a spec, or `None` when it would be empty.
/// Raw filters pass through byte for byte.
pub fn resolve(spec: &FilterSpec) -> Option<String> {
    let bpf = match spec {
        FilterSpec::Raw(raw) => raw.clone(),
        FilterSpec::Structured(expr) => compile(expr),
    };
    if bpf.is_empty() {
        None
    } else {
        Some(bpf)
    }
}
