//! Dynamic worker allocation
//!
//! Requirements analysis plus the scoring allocator that picks the most
//! suitable worker for each task.

mod allocator;
mod requirements;

pub use allocator::{AllocationAnalytics, AllocationRecord, Allocator, WorkerHistory};
pub use requirements::{RequirementsAnalyzer, TaskRequirements};
