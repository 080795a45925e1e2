// Trigger policy
// The set of event names a workflow may declare under `on:`

use std::collections::BTreeSet;

/// Events accepted when no custom policy is configured.
pub const DEFAULT_TRIGGERS: &[&str] = &[
    "push",
    "pull_request",
    "pull_request_target",
    "workflow_dispatch",
    "schedule",
    "release",
    "merge_group",
    "workflow_call",
];

/// Which trigger events the parser accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerPolicy {
    supported: BTreeSet<String>,
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self {
            supported: DEFAULT_TRIGGERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl TriggerPolicy {
    /// A policy that accepts nothing until events are added.
    pub fn empty() -> Self {
        Self {
            supported: BTreeSet::new(),
        }
    }

    pub fn with_trigger(mut self, event: impl Into<String>) -> Self {
        self.supported.insert(event.into());
        self
    }

    pub fn is_supported(&self, event: &str) -> bool {
        self.supported.contains(event)
    }

    pub fn supported(&self) -> impl Iterator<Item = &str> {
        self.supported.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = TriggerPolicy::default();
        assert!(policy.is_supported("push"));
        assert!(policy.is_supported("pull_request"));
        assert!(!policy.is_supported("gollum"));
    }

    #[test]
    fn test_custom_policy() {
        let policy = TriggerPolicy::empty().with_trigger("deploy");
        assert!(policy.is_supported("deploy"));
        assert!(!policy.is_supported("push"));
        assert_eq!(policy.supported().collect::<Vec<_>>(), vec!["deploy"]);
    }
}
