pub mod engine;
pub mod event;
pub mod prompt;
pub mod tools;

pub use engine::{Agent, AgentRun};
pub use event::{AgentEvent, ToolStatus};
