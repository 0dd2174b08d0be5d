//! Python bindings (feature `python`)
//!
//! Only the pure pieces are exposed: classification, the mapping store and
//! one-shot reverts. Values cross the boundary as JSON strings.

use pyo3::exceptions::{PyKeyError, PyValueError};
use pyo3::prelude::*;

use crate::compliance::classifier;
use crate::compliance::mapping::{Entity, EntityType, MappingStore, Span};
use crate::compliance::revert;

/// Classify a prompt. Returns `(model_key, rationale)`.
#[pyfunction]
pub fn classify(text: &str) -> (String, String) {
    let result = classifier::classify(text);
    (result.strategy.model_key().to_string(), result.rationale)
}

/// Restore originals in `text`. `mappings_json` is a list of entities.
#[pyfunction]
pub fn revert_text(text: &str, mappings_json: &str) -> PyResult<String> {
    let entities: Vec<Entity> =
        serde_json::from_str(mappings_json).map_err(|e| PyValueError::new_err(e.to_string()))?;
    let mut store = MappingStore::new();
    for entity in entities {
        store
            .put(entity)
            .map_err(|e| PyValueError::new_err(e.to_string()))?;
    }

    let outcome = revert::revert(text, &store);
    let payload = serde_json::json!({
        "text": outcome.text,
        "restored_count": outcome.restored_count,
        "unresolved": outcome.unresolved,
    });
    Ok(payload.to_string())
}

#[pyclass(name = "MappingStore")]
pub struct PyMappingStore {
    store: MappingStore,
}

#[pymethods]
impl PyMappingStore {
    #[new]
    pub fn new() -> Self {
        PyMappingStore {
            store: MappingStore::new(),
        }
    }

    #[pyo3(signature = (id, entity_type, original, start, end, substitute=None))]
    pub fn put(
        &mut self,
        id: String,
        entity_type: &str,
        original: String,
        start: usize,
        end: usize,
        substitute: Option<String>,
    ) -> PyResult<()> {
        let mut entity = Entity::new(id, EntityType::from_label(entity_type), original, Span::new(start, end));
        entity.substitute = substitute;
        self.store
            .put(entity)
            .map_err(|e| PyValueError::new_err(e.to_string()))
    }

    /// Entity as JSON
    pub fn get(&self, id: &str) -> PyResult<String> {
        let entity = self
            .store
            .get(id)
            .ok_or_else(|| PyKeyError::new_err(id.to_string()))?;
        serde_json::to_string(entity).map_err(|e| PyValueError::new_err(e.to_string()))
    }

    /// All entities as a JSON list, in insertion order
    pub fn all(&self) -> PyResult<String> {
        serde_json::to_string(self.store.all()).map_err(|e| PyValueError::new_err(e.to_string()))
    }

    pub fn clear(&mut self) {
        self.store.clear();
    }

    pub fn revert(&self, text: &str) -> (String, usize) {
        let outcome = revert::revert(text, &self.store);
        (outcome.text, outcome.restored_count)
    }

    pub fn __len__(&self) -> usize {
        self.store.len()
    }

    pub fn __repr__(&self) -> String {
        format!("MappingStore({} entities)", self.store.len())
    }
}

impl Default for PyMappingStore {
    fn default() -> Self {
        Self::new()
    }
}
