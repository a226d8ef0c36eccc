//! Approval policy for definitions that carry privileged code.
//!
//! A definition with `containsPrivilegedCode: true` may only run once the
//! user has approved it. Approvals are remembered per definition id for the
//! lifetime of the gate.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::definitions::AgentDefinition;

/// Decides whether a definition may run without an explicit approval.
pub trait PolicyGate: Send + Sync {
    /// Whether running `definition` needs a recorded approval.
    fn approval_required(&self, definition: &AgentDefinition) -> bool;

    fn has_approval(&self, definition_id: &str) -> bool;

    /// Record the user's answer. `granted: false` revokes a prior approval.
    fn record_approval(&self, definition_id: &str, granted: bool);
}

/// A recorded approval decision.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalRecord {
    pub granted: bool,
    pub decided_at: DateTime<Utc>,
}

/// In-memory [`PolicyGate`].
#[derive(Debug)]
pub struct ApprovalMemory {
    require_for_privileged: bool,
    decisions: RwLock<HashMap<String, ApprovalRecord>>,
}

impl ApprovalMemory {
    pub fn new(require_for_privileged: bool) -> Self {
        Self {
            require_for_privileged,
            decisions: RwLock::new(HashMap::new()),
        }
    }

    /// Last decision recorded for a definition, if any.
    pub fn decision(&self, definition_id: &str) -> Option<ApprovalRecord> {
        self.decisions.read().get(definition_id).cloned()
    }

    /// Forget every decision.
    pub fn reset(&self) {
        self.decisions.write().clear();
    }
}

impl Default for ApprovalMemory {
    fn default() -> Self {
        Self::new(true)
    }
}

impl PolicyGate for ApprovalMemory {
    /// Undeclared inline scripts count as privileged code.
    fn approval_required(&self, definition: &AgentDefinition) -> bool {
        self.require_for_privileged
            && (definition.contains_privileged_code || definition.runs_script())
    }

    fn has_approval(&self, definition_id: &str) -> bool {
        self.decisions
            .read()
            .get(definition_id)
            .map_or(false, |d| d.granted)
    }

    fn record_approval(&self, definition_id: &str, granted: bool) {
        log::info!(
            "Approval for '{}' {}",
            definition_id,
            if granted { "granted" } else { "revoked" }
        );
        self.decisions.write().insert(
            definition_id.to_string(),
            ApprovalRecord {
                granted,
                decided_at: Utc::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(privileged: bool) -> AgentDefinition {
        let mut def = AgentDefinition::from_yaml("id: sketchy\nname: Sketchy\n").unwrap();
        def.contains_privileged_code = privileged;
        def
    }

    #[test]
    fn test_only_privileged_definitions_need_approval() {
        let gate = ApprovalMemory::default();
        assert!(gate.approval_required(&definition(true)));
        assert!(!gate.approval_required(&definition(false)));

        let relaxed = ApprovalMemory::new(false);
        assert!(!relaxed.approval_required(&definition(true)));
    }

    #[test]
    fn test_undeclared_script_needs_approval() {
        let def = AgentDefinition::from_yaml(
            "id: quiet\nname: Quiet\ncapabilities:\n  - name: go\n    actions:\n      - type: executeScript\n        code: \"1\"\n",
        )
        .unwrap();
        assert!(!def.contains_privileged_code);
        assert!(ApprovalMemory::default().approval_required(&def));
    }

    #[test]
    fn test_grant_and_revoke() {
        let gate = ApprovalMemory::default();
        assert!(!gate.has_approval("sketchy"));

        gate.record_approval("sketchy", true);
        assert!(gate.has_approval("sketchy"));

        gate.record_approval("sketchy", false);
        assert!(!gate.has_approval("sketchy"));
        assert_eq!(gate.decision("sketchy").map(|d| d.granted), Some(false));

        gate.reset();
        assert!(gate.decision("sketchy").is_none());
    }
}
