//! Services - motion control and session logic
//!
//! This module contains the core business logic services:
//! - `sampler` - Non-repeating first-axis sampler for drills
//! - `completion` - Per-move completion correlation
//! - `executor` - Runs motion sequences against the actuator
//! - `zone_router` - Maps occupancy reports to cues and reactions
//! - `scheduler` - Mode A / Mode B session loop

pub mod completion;
pub mod executor;
pub mod sampler;
pub mod scheduler;
pub mod zone_router;

// Re-export commonly used types
pub use completion::CompletionRouter;
pub use executor::{ExecutorSettings, MotionError, MotionExecutor, SequenceOutcome};
pub use sampler::NonRepeatingSampler;
pub use scheduler::{SchedulerSettings, SchedulerState, SessionScheduler};
pub use zone_router::{RouteOutcome, ZoneRouter};
