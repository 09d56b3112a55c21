//! Actor implementations

pub mod agent;

pub use agent::{AgentActor, AgentActorArgs, reply};
