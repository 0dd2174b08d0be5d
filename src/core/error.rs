//! Error taxonomy for the anonymization workflow
//!
//! Precondition failures (`AlreadyRunning`, `NotSupportedHere`) stop a run
//! before it starts. Step failures unwind the whole run. The revert engine
//! has no error type: an incomplete revert is reported, not raised.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compliance::mapping::MappingError;

/// Failures surfaced by the workflow state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum WorkflowError {
    /// Another run is active. Recoverable; retry once it finishes.
    #[error("a workflow run is already in progress")]
    AlreadyRunning,

    /// The current chat surface cannot be automated.
    #[error("this surface cannot be automated: {0}")]
    NotSupportedHere(String),

    #[error("detection failed: {0}")]
    DetectionFailed(String),

    #[error("dispatch failed: {0}")]
    DispatchFailed(String),

    #[error("no new response within {timeout_ms}ms")]
    ResponseTimeout { timeout_ms: u64 },

    #[error("workflow cancelled")]
    Cancelled,

    /// Mapping store invariant violated. Fatal to the run, never retried.
    #[error(transparent)]
    Mapping(#[from] MappingError),
}

impl WorkflowError {
    /// True for errors that prevent a run from ever starting.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            WorkflowError::AlreadyRunning | WorkflowError::NotSupportedHere(_)
        )
    }
}

/// Failures reported by a `Detector` backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DetectorError {
    #[error("detection service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("detection timed out")]
    Timeout,
}

impl From<DetectorError> for WorkflowError {
    fn from(err: DetectorError) -> Self {
        WorkflowError::DetectionFailed(err.to_string())
    }
}

/// Configuration loading failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}
