//! Task routing layer
//!
//! Rule shortcuts and strategy-based selection on top of the allocator.

mod router;
mod rules;

pub use router::{
    RouteMethod, RoutePerformance, RoutingAnalytics, RoutingDecision, RoutingStrategy, TaskRouter,
};
pub use rules::{RouteTask, RoutingRule, RuleTarget, default_rules};
