//! Security helpers for the relay's only authenticated surface: the agent
//! WebSocket. [`AgentKeyGuard`] checks the optional shared secret in
//! constant time.

pub mod agent_key;

#[allow(unused_imports)]
pub use agent_key::{constant_time_eq, is_public_bind, AgentKeyGuard};
