pub mod engine;
pub mod stats;

pub use engine::{ChangeRequestDetail, EngineError, WorkflowEngine};
pub use stats::ChangeRequestStats;
