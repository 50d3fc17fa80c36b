// src/state/mod.rs

//! Durable session, wave and agent state.

pub mod model;
pub mod store;

pub use model::{
    AgentRecord, AgentStatus, BudgetRecord, KillReason, NewSession, Session, SessionStatus,
    WaveRecord, WaveStatus,
};
pub use store::StateStore;
