//! Resolve an `@target` name against a snapshot of live agents.

use std::collections::HashMap;

use crate::registry::AgentRecord;

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Local(AgentRecord),
    /// Several agents share the requested type; retry with one of these.
    Ambiguous(Vec<String>),
    NotFound,
}

/// Resolve `target` against live agents. First match wins:
/// exact agent id, then `type-port` (or `type:port`), then a bare type that
/// exactly one agent has.
pub fn resolve_target(agents: &HashMap<String, AgentRecord>, target: &str) -> Resolution {
    let wanted = target.trim().trim_start_matches('@');
    if wanted.is_empty() {
        return Resolution::NotFound;
    }

    if let Some(record) = agents
        .values()
        .find(|record| record.agent_id.eq_ignore_ascii_case(wanted))
    {
        tracing::debug!(target = "synapse::routing", target_name = %wanted, agent_id = %record.agent_id, "resolved by agent id");
        return Resolution::Local(record.clone());
    }

    if let Some((agent_type, port)) = split_type_port(wanted) {
        if let Some(record) = agents
            .values()
            .find(|record| record.port == port && record.agent_type.eq_ignore_ascii_case(agent_type))
        {
            tracing::debug!(target = "synapse::routing", target_name = %wanted, agent_id = %record.agent_id, "resolved by type and port");
            return Resolution::Local(record.clone());
        }
    }

    let mut by_type: Vec<&AgentRecord> = agents
        .values()
        .filter(|record| record.agent_type.eq_ignore_ascii_case(wanted))
        .collect();
    match by_type.len() {
        0 => Resolution::NotFound,
        1 => Resolution::Local(by_type[0].clone()),
        _ => {
            by_type.sort_by_key(|record| record.port);
            let suggestions: Vec<String> = by_type
                .iter()
                .map(|record| format!("@{}", record.short_name()))
                .collect();
            tracing::debug!(target = "synapse::routing", target_name = %wanted, candidates = ?suggestions, "ambiguous target");
            Resolution::Ambiguous(suggestions)
        }
    }
}

/// `claude-8100` or `claude:8100`; the type itself may contain hyphens.
fn split_type_port(token: &str) -> Option<(&str, u16)> {
    let idx = token.rfind(['-', ':'])?;
    let (agent_type, port) = (&token[..idx], &token[idx + 1..]);
    if agent_type.is_empty() {
        return None;
    }
    port.parse().ok().map(|port| (agent_type, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{make_agent_id, STATUS_READY};

    fn agents(specs: &[(&str, u16)]) -> HashMap<String, AgentRecord> {
        specs
            .iter()
            .map(|(agent_type, port)| {
                let id = make_agent_id(agent_type, *port);
                (id.clone(), AgentRecord::new(&id, agent_type, *port, STATUS_READY))
            })
            .collect()
    }

    fn resolved_id(resolution: Resolution) -> String {
        match resolution {
            Resolution::Local(record) => record.agent_id,
            other => panic!("expected local resolution, got {other:?}"),
        }
    }

    #[test]
    fn exact_id_is_case_insensitive() {
        let live = agents(&[("claude", 8100), ("claude", 8101)]);
        assert_eq!(
            resolved_id(resolve_target(&live, "Synapse-Claude-8101")),
            "synapse-claude-8101"
        );
    }

    #[test]
    fn type_port_shorthand() {
        let live = agents(&[("claude", 8100), ("claude", 8101)]);
        assert_eq!(
            resolved_id(resolve_target(&live, "claude-8100")),
            "synapse-claude-8100"
        );
        assert_eq!(
            resolved_id(resolve_target(&live, "claude:8101")),
            "synapse-claude-8101"
        );
    }

    #[test]
    fn unique_type_resolves() {
        let live = agents(&[("claude", 8100), ("gemini", 8110)]);
        assert_eq!(
            resolved_id(resolve_target(&live, "@gemini")),
            "synapse-gemini-8110"
        );
    }

    #[test]
    fn duplicate_type_is_ambiguous_with_suggestions() {
        let live = agents(&[("claude", 8101), ("claude", 8100), ("gemini", 8110)]);
        assert_eq!(
            resolve_target(&live, "claude"),
            Resolution::Ambiguous(vec!["@claude-8100".into(), "@claude-8101".into()])
        );
    }

    #[test]
    fn hyphenated_types_and_unknown_targets() {
        let live = agents(&[("gpt-codex", 8120)]);
        assert_eq!(
            resolved_id(resolve_target(&live, "gpt-codex-8120")),
            "synapse-gpt-codex-8120"
        );
        assert_eq!(resolve_target(&live, "codex"), Resolution::NotFound);
        assert_eq!(resolve_target(&live, "gpt-codex-9999"), Resolution::NotFound);
        assert_eq!(resolve_target(&live, ""), Resolution::NotFound);
    }
}
