pub mod event;
pub mod plan;

pub use event::{AgentEvent, EventPayload};
pub use plan::{Plan, Step, StepStatus};
