//! Workflow runtime: configuration, collaborators, the state machine and
//! preference storage

pub mod awaiter;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod steps;
pub mod storage;
pub mod workflow;

#[cfg(test)]
pub mod testing;
