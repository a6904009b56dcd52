//! Client-side state for the Alva dashboard: the reconciled mirrors of the
//! four backend tables and everything derived from them.

pub mod collections;
pub mod commands;
pub mod derived;
pub mod format;
pub mod pipeline;
pub mod snapshot;
pub mod steps;

pub use collections::{Applied, Collections, IgnoreReason, OrderedCollection, Placement, SeedReport};
pub use commands::PendingCommands;
pub use derived::{
    active_task, assistant_status, last_active, minutes_since, stats, AssistantStatus,
    DashboardStats, DerivedState, ONLINE_WINDOW_MINUTES,
};
pub use pipeline::{focus_task, thoughts_for_task, TaskPipeline, RECENTLY_COMPLETED_LIMIT};
pub use snapshot::DashboardSnapshot;
pub use steps::{progress_percent, steps_for_task, Milestone, StepTree};
