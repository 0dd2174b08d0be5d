//! PromptVeil Core - PII anonymization for outbound chat prompts
//!
//! Detects sensitive values in a prompt, swaps them for synthetic
//! substitutes before it is sent, waits for the external system's response
//! and restores the original values in what it rendered.
//!
//! The chat page, the detection backend and the substitute generator are
//! collaborators supplied by the host (see [`core::collaborators`]).

pub mod compliance;
pub mod core;
#[cfg(feature = "python")]
pub mod py_api;

// Re-export the caller-facing API
pub use compliance::classifier::{classify, ClassificationResult, DetectionStrategy, SelectionMode};
pub use compliance::faker::PoolFaker;
pub use compliance::mapping::{Entity, EntityType, MappingError, MappingStore};
pub use compliance::pii::PatternDetector;
pub use compliance::revert::{revert, RevertOutcome};
pub use core::config::WorkflowConfig;
pub use core::error::WorkflowError;
pub use core::workflow::{AnonymizerSession, Collaborators, ReportOutcome, WorkflowPhase, WorkflowReport};

/// Initialize tracing for the library.
#[cfg_attr(feature = "python", pyo3::pyfunction)]
pub fn setup_logging(level: Option<String>) {
    let filter = level.unwrap_or_else(|| "info".to_string());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Python module initialization
#[cfg(feature = "python")]
#[pyo3::pymodule]
fn promptveil_core(m: &pyo3::Bound<'_, pyo3::types::PyModule>) -> pyo3::PyResult<()> {
    use pyo3::prelude::*;

    m.add_function(wrap_pyfunction!(setup_logging, m)?)?;
    m.add_function(wrap_pyfunction!(py_api::classify, m)?)?;
    m.add_function(wrap_pyfunction!(py_api::revert_text, m)?)?;
    m.add_class::<py_api::PyMappingStore>()?;
    Ok(())
}
