//! Benchmark orchestration

pub mod agent;

pub use agent::{run_agents, Agent, AgentResult};
