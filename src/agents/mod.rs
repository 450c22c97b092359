//! Agent Registry & Router (C4): domain agents behind a capability-based
//! router, and the `Agent` execution contract they all implement.

mod registry;
mod types;

pub use registry::AgentRegistry;
pub use types::{Agent, AgentContext, AgentHandle, AgentHealth, Capability};
