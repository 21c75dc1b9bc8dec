//! Routing rules
//!
//! An ordered list of predicate → target shortcuts evaluated before any
//! strategy-based selection. The highest-priority matching rule wins.

use crate::worker::Capability;

/// The task fields a rule predicate can see
#[derive(Debug, Clone)]
pub struct RouteTask {
    pub id: String,
    pub title: String,
    pub description: String,
    /// 1-10
    pub priority: u8,
}

/// Where a matched rule sends the task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleTarget {
    /// A specific worker ID
    Worker(String),
    /// The best available worker with this capability
    Capability(Capability),
    /// The available worker with the highest performance score
    BestPerformer,
}

/// A single routing rule
pub struct RoutingRule {
    pub rule_id: String,
    pub name: String,
    pub predicate: Box<dyn Fn(&RouteTask) -> bool + Send + Sync>,
    pub target: RuleTarget,
    pub priority: i32,
    pub enabled: bool,
}

impl RoutingRule {
    pub fn new(
        rule_id: impl Into<String>,
        name: impl Into<String>,
        predicate: impl Fn(&RouteTask) -> bool + Send + Sync + 'static,
        target: RuleTarget,
        priority: i32,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            name: name.into(),
            predicate: Box::new(predicate),
            target,
            priority,
            enabled: true,
        }
    }

    pub fn matches(&self, task: &RouteTask) -> bool {
        self.enabled && (self.predicate)(task)
    }
}

impl std::fmt::Debug for RoutingRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingRule")
            .field("rule_id", &self.rule_id)
            .field("name", &self.name)
            .field("target", &self.target)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .finish()
    }
}

fn title_contains(task: &RouteTask, words: &[&str]) -> bool {
    let title = task.title.to_lowercase();
    words.iter().any(|w| title.contains(w))
}

/// The built-in rule set
pub fn default_rules() -> Vec<RoutingRule> {
    vec![
        RoutingRule::new(
            "critical_to_best",
            "Critical tasks to best performers",
            |t| t.priority >= 8 || t.title.to_lowercase().contains("critical"),
            RuleTarget::BestPerformer,
            100,
        ),
        RoutingRule::new(
            "docs_to_specialist",
            "Documentation to specialists",
            |t| title_contains(t, &["document", "readme", "docs"]),
            RuleTarget::Capability(Capability::Documentation),
            90,
        ),
        RoutingRule::new(
            "tests_to_specialist",
            "Tests to test specialists",
            |t| title_contains(t, &["test", "unittest", "pytest"]),
            RuleTarget::Capability(Capability::Testing),
            90,
        ),
        RoutingRule::new(
            "debug_to_specialist",
            "Debugging to specialists",
            |t| title_contains(t, &["debug", "fix", "bug", "error"]),
            RuleTarget::Capability(Capability::Debugging),
            85,
        ),
    ]
}
