//! Task requirements analysis
//!
//! Derives complexity, capabilities, resource hints, and a duration
//! estimate from a task's title and description with lightweight keyword
//! matching. Requirements are recomputed on demand, never stored.

use std::collections::HashSet;

use regex::Regex;

use crate::worker::{Capability, Complexity};

/// Requirements and characteristics derived from a task's text
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRequirements {
    pub complexity: Complexity,
    /// Minutes
    pub estimated_duration: u64,
    pub required_capabilities: HashSet<Capability>,
    pub memory_intensive: bool,
    pub cpu_intensive: bool,
    pub requires_filesystem: bool,
    pub requires_network: bool,
    /// Number of potential parallel subtasks, capped at 5
    pub parallel_subtasks: usize,
    /// 1-10, higher is more urgent
    pub priority: u8,
}

impl TaskRequirements {
    /// Resource requirement score used by the plan validator
    pub fn resource_score(&self) -> f64 {
        let mut score = match self.complexity {
            Complexity::Trivial => 1.0,
            Complexity::Low => 2.0,
            Complexity::Medium => 4.0,
            Complexity::High => 7.0,
            Complexity::Critical => 10.0,
        };

        if self.memory_intensive {
            score *= 1.5;
        }
        if self.cpu_intensive {
            score *= 1.3;
        }
        if self.requires_filesystem {
            score *= 1.1;
        }
        if self.requires_network {
            score *= 1.2;
        }

        if self.estimated_duration > 60 {
            score *= 1.4;
        } else if self.estimated_duration > 30 {
            score *= 1.2;
        }

        score + self.required_capabilities.len() as f64 * 0.5
    }

    /// Rough peak memory estimate in GB
    pub fn estimated_memory_gb(&self) -> u64 {
        if self.memory_intensive { 4 } else { 1 }
    }
}

const COMPLEXITY_KEYWORDS: &[(Complexity, &[&str])] = &[
    (
        Complexity::Trivial,
        &[
            "fix typo",
            "update comment",
            "change variable name",
            "add import",
            "simple change",
            "quick fix",
            "minor update",
        ],
    ),
    (
        Complexity::Low,
        &[
            "add function",
            "create class",
            "write test",
            "update config",
            "implement method",
            "add feature",
            "simple",
        ],
    ),
    (
        Complexity::Medium,
        &[
            "implement api",
            "create module",
            "refactor",
            "optimize",
            "add authentication",
            "database",
            "integration",
        ],
    ),
    (
        Complexity::High,
        &[
            "architecture",
            "system design",
            "complex algorithm",
            "performance",
            "security",
            "large refactor",
            "multiple components",
        ],
    ),
    (
        Complexity::Critical,
        &[
            "entire system",
            "complete rewrite",
            "major architecture",
            "enterprise",
            "scalability",
            "distributed system",
        ],
    ),
];

const CAPABILITY_KEYWORDS: &[(Capability, &[&str])] = &[
    (
        Capability::Code,
        &[
            "implement",
            "code",
            "function",
            "class",
            "method",
            "algorithm",
            "programming",
            "develop",
            "write",
        ],
    ),
    (
        Capability::Research,
        &[
            "research",
            "analyze",
            "investigate",
            "study",
            "explore",
            "evaluate",
            "assess",
            "compare",
        ],
    ),
    (
        Capability::Documentation,
        &[
            "document",
            "readme",
            "docs",
            "comment",
            "docstring",
            "explain",
            "describe",
            "guide",
        ],
    ),
    (
        Capability::Testing,
        &["test", "unittest", "pytest", "jest", "spec", "coverage", "qa", "quality assurance"],
    ),
    (
        Capability::Refactoring,
        &["refactor", "restructure", "reorganize", "cleanup", "improve code", "modernize"],
    ),
    (
        Capability::Debugging,
        &["debug", "fix bug", "error", "issue", "problem", "troubleshoot", "diagnose"],
    ),
    (
        Capability::Design,
        &["design", "architecture", "structure", "pattern", "blueprint", "plan"],
    ),
    (
        Capability::Review,
        &["review", "audit", "inspect", "examine", "check", "validate", "verify"],
    ),
];

const MEMORY_KEYWORDS: &[&str] = &["large data", "memory", "cache", "buffer", "dataset"];
const CPU_KEYWORDS: &[&str] = &["algorithm", "compute", "calculation", "process", "intensive"];
const FILESYSTEM_KEYWORDS: &[&str] = &["file", "directory", "read", "write", "storage"];
const NETWORK_KEYWORDS: &[&str] = &["api", "http", "request", "download", "upload", "remote"];

const PARALLEL_KEYWORDS: &[&str] = &[
    "multiple", "several", "various", "different", "each", "all", "batch", "parallel",
];

const HIGH_PRIORITY_KEYWORDS: &[&str] = &["urgent", "critical", "asap", "immediately", "priority"];
const LOW_PRIORITY_KEYWORDS: &[&str] = &["later", "eventually", "nice to have", "optional"];

/// Analyzes task text into [`TaskRequirements`]
pub struct RequirementsAnalyzer {
    list_item: Regex,
}

impl Default for RequirementsAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl RequirementsAnalyzer {
    pub fn new() -> Self {
        Self {
            // Numbered or bulleted list items suggest parallel subtasks
            list_item: Regex::new(r"(?m)(\d+\.|\-\s|\*\s)").expect("static pattern"),
        }
    }

    /// Analyze a task's title and description
    pub fn analyze(&self, title: &str, description: &str) -> TaskRequirements {
        let text = format!("{} {}", title, description).to_lowercase();

        let complexity = self.determine_complexity(&text);
        TaskRequirements {
            complexity,
            estimated_duration: self.estimate_duration(&text, complexity),
            required_capabilities: self.determine_capabilities(&text),
            memory_intensive: contains_any(&text, MEMORY_KEYWORDS),
            cpu_intensive: contains_any(&text, CPU_KEYWORDS),
            requires_filesystem: contains_any(&text, FILESYSTEM_KEYWORDS),
            requires_network: contains_any(&text, NETWORK_KEYWORDS),
            parallel_subtasks: self.detect_parallel_subtasks(&text),
            priority: determine_priority(&text),
        }
    }

    fn determine_complexity(&self, text: &str) -> Complexity {
        let mut scores: Vec<(Complexity, usize)> = COMPLEXITY_KEYWORDS
            .iter()
            .map(|(complexity, keywords)| {
                let hits = keywords.iter().filter(|k| text.contains(*k)).count();
                (*complexity, hits)
            })
            .collect();

        let word_count = text.split_whitespace().count();
        if word_count > 200 {
            bump(&mut scores, Complexity::High, 2);
        } else if word_count > 100 {
            bump(&mut scores, Complexity::Medium, 1);
        }

        // Several conjunctions hint at compound requirements
        let conjunctions = ["and", "also", "additionally", "furthermore"]
            .iter()
            .filter(|w| text.contains(*w))
            .count();
        if conjunctions > 2 {
            bump(&mut scores, Complexity::High, 1);
        }

        scores
            .iter()
            .max_by_key(|(_, hits)| *hits)
            .filter(|(_, hits)| *hits > 0)
            .map(|(complexity, _)| *complexity)
            .unwrap_or(Complexity::Medium)
    }

    fn determine_capabilities(&self, text: &str) -> HashSet<Capability> {
        let mut capabilities: HashSet<Capability> = CAPABILITY_KEYWORDS
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
            .map(|(capability, _)| *capability)
            .collect();

        if capabilities.is_empty() {
            capabilities.insert(Capability::Code);
        }
        capabilities
    }

    fn estimate_duration(&self, text: &str, complexity: Complexity) -> u64 {
        let base: f64 = match complexity {
            Complexity::Trivial => 5.0,
            Complexity::Low => 15.0,
            Complexity::Medium => 45.0,
            Complexity::High => 120.0,
            Complexity::Critical => 300.0,
        };

        let factor = if text.contains("quick") || text.contains("simple") {
            0.7
        } else if text.contains("entire") || text.contains("complete") {
            2.0
        } else if text.contains("complex") || text.contains("comprehensive") {
            1.5
        } else {
            1.0
        };

        (base * factor) as u64
    }

    fn detect_parallel_subtasks(&self, text: &str) -> usize {
        let mut count = PARALLEL_KEYWORDS.iter().filter(|k| text.contains(*k)).count();
        let list_items = self.list_item.find_iter(text).count();
        if list_items > 1 {
            count += list_items;
        }
        count.min(5)
    }
}

fn bump(scores: &mut [(Complexity, usize)], target: Complexity, by: usize) {
    if let Some(entry) = scores.iter_mut().find(|(c, _)| *c == target) {
        entry.1 += by;
    }
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

fn determine_priority(text: &str) -> u8 {
    if contains_any(text, HIGH_PRIORITY_KEYWORDS) {
        8
    } else if contains_any(text, LOW_PRIORITY_KEYWORDS) {
        3
    } else {
        5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(title: &str, description: &str) -> TaskRequirements {
        RequirementsAnalyzer::new().analyze(title, description)
    }

    #[test]
    fn test_trivial_task() {
        let req = analyze("Fix typo in docs", "quick fix for a typo");
        assert_eq!(req.complexity, Complexity::Trivial);
        assert!(req.estimated_duration <= 5);
    }

    #[test]
    fn test_critical_task() {
        let req = analyze(
            "Complete rewrite",
            "complete rewrite of the entire system for scalability as a distributed system",
        );
        assert_eq!(req.complexity, Complexity::Critical);
        // "entire"/"complete" doubles the base estimate
        assert_eq!(req.estimated_duration, 600);
    }

    #[test]
    fn test_default_complexity_is_medium() {
        let req = analyze("Do a thing", "no recognizable keywords here");
        assert_eq!(req.complexity, Complexity::Medium);
    }

    #[test]
    fn test_capability_detection() {
        let req = analyze("Write tests", "add unittest coverage for the parser");
        assert!(req.required_capabilities.contains(&Capability::Testing));

        let req = analyze("Debug crash", "diagnose the error on startup");
        assert!(req.required_capabilities.contains(&Capability::Debugging));
    }

    #[test]
    fn test_default_capability_is_code() {
        let req = analyze("Untitled", "no matching words at all");
        assert_eq!(req.required_capabilities.len(), 1);
        assert!(req.required_capabilities.contains(&Capability::Code));
    }

    #[test]
    fn test_resource_hints() {
        let req = analyze("Process dataset", "load a large data cache and compute statistics");
        assert!(req.memory_intensive);
        assert!(req.cpu_intensive);

        let req = analyze("Fetch data", "download results from the remote api");
        assert!(req.requires_network);
    }

    #[test]
    fn test_priority_keywords() {
        assert_eq!(analyze("Urgent fix", "asap").priority, 8);
        assert_eq!(analyze("Cleanup", "nice to have, eventually").priority, 3);
        assert_eq!(analyze("Normal", "regular work item with no special words").priority, 5);
    }

    #[test]
    fn test_parallel_subtask_cap() {
        let req = analyze(
            "Batch update",
            "multiple several various different each all batch parallel 1. one 2. two 3. three",
        );
        assert_eq!(req.parallel_subtasks, 5);
    }

    #[test]
    fn test_resource_score_scales_with_complexity() {
        let trivial = analyze("Fix typo", "quick fix");
        let critical = analyze("Rewrite", "complete rewrite of the entire system, enterprise scalability");
        assert!(critical.resource_score() > trivial.resource_score());
    }
}
