//! Pre-execution plan validation
//!
//! The gate between "task graph constructed" and "execution begins":
//! dependency, resource, security, completeness, complexity, and
//! consistency checks rolled into one report.

mod dependency;
mod plan;
mod resources;
mod security;

pub use dependency::DependencyValidator;
pub use plan::{PlanMetrics, PlanReport, PlanValidator};
pub use resources::{ResourceRequirements, ResourceValidator};
pub use security::{RiskAssessment, RiskLevel, SecurityValidator};

use serde::{Deserialize, Serialize};

/// How bad a validation issue is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    /// Must be fixed before execution
    Error,
    /// Serious, but not execution-blocking by itself
    High,
    Warning,
    Info,
}

impl std::fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Error => "error",
            Self::High => "high",
            Self::Warning => "warning",
            Self::Info => "info",
        };
        write!(f, "{}", s)
    }
}

/// Which validator produced an issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueCategory {
    Dependencies,
    Resources,
    Security,
    Completeness,
    Complexity,
    Consistency,
}

/// One problem found during plan validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub issue_id: String,
    pub category: IssueCategory,
    pub severity: IssueSeverity,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub affected_tasks: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Blocking issues force rejection
    #[serde(default)]
    pub blocking: bool,
}

/// Overall verdict on a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    Approved,
    ApprovedWithWarnings,
    RequiresModification,
    Rejected,
}

impl ValidationOutcome {
    /// Whether a caller may proceed to execution
    pub fn can_execute(&self) -> bool {
        matches!(self, Self::Approved | Self::ApprovedWithWarnings)
    }
}

impl std::fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Approved => "approved",
            Self::ApprovedWithWarnings => "approved_with_warnings",
            Self::RequiresModification => "requires_modification",
            Self::Rejected => "rejected",
        };
        write!(f, "{}", s)
    }
}
