pub mod backend;
pub mod change;
pub mod errors;
pub mod fixtures;
pub mod ids;
pub mod model;
pub mod security;

pub use backend::{Backend, ChangeStream};
pub use change::{Change, ChangeKind, FetchQuery, Order, RawChange, Record, Table, ACTIVITY_LIMIT};
pub use errors::{BackendError, DecodeError};
pub use ids::{ActivityId, StepId, TaskId, ThoughtId};
pub use model::{
    ActivityEvent, Actor, NewTask, StepStatus, Task, TaskStatus, TaskStep, ThoughtEvent, ThoughtType,
};
