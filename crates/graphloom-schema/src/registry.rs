//! The process-wide schema registry.
//!
//! One active schema per KB. Registration validates, compiles, and replaces
//! atomically; readers hold `Arc` snapshots for the duration of an operation,
//! so a replacement never changes a run mid-flight.

use crate::descriptor::SchemaDescriptor;
use crate::validate::{self, CompiledSchema, SchemaError, ValidationReport};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Successful registration.
#[derive(Debug, Clone)]
pub struct Registered {
    pub kb_id: String,
    /// Soft findings from validation (PII heuristics etc).
    pub warnings: Vec<String>,
}

/// Registry of compiled schemas, keyed by `kb_id`.
#[derive(Default)]
pub struct SchemaRegistry {
    schemas: DashMap<String, Arc<CompiledSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate, compile, and store a schema, replacing any prior schema for
    /// the same KB.
    pub fn register_value(&self, raw: &Value) -> Result<Registered, SchemaError> {
        let descriptor = validate::parse_descriptor(raw)?;
        self.register_descriptor(descriptor)
    }

    /// As [`register_value`](Self::register_value), from raw JSON text.
    pub fn register_str(&self, raw: &str) -> Result<Registered, SchemaError> {
        let value: Value = serde_json::from_str(raw).map_err(|e| SchemaError::Invalid {
            issues: vec![format!("descriptor is not valid JSON: {e}")],
        })?;
        self.register_value(&value)
    }

    /// Register an already-parsed descriptor.
    pub fn register_descriptor(
        &self,
        descriptor: SchemaDescriptor,
    ) -> Result<Registered, SchemaError> {
        let (compiled, warnings) = validate::compile(descriptor)?;
        let kb_id = compiled.kb_id().to_string();
        let replaced = self
            .schemas
            .insert(kb_id.clone(), Arc::new(compiled))
            .is_some();
        info!(kb_id = %kb_id, replaced, warnings = warnings.len(), "schema registered");
        Ok(Registered { kb_id, warnings })
    }

    /// Snapshot of the active schema for a KB.
    pub fn get(&self, kb_id: &str) -> Option<Arc<CompiledSchema>> {
        self.schemas.get(kb_id).map(|entry| entry.value().clone())
    }

    /// All KBs with a registered schema, sorted.
    pub fn list_kbs(&self) -> Vec<String> {
        let mut kbs: Vec<String> = self.schemas.iter().map(|e| e.key().clone()).collect();
        kbs.sort();
        kbs
    }

    /// Dry-run validation; never stores anything.
    pub fn validate_value(raw: &Value) -> ValidationReport {
        validate::validate_value(raw)
    }

    /// Test hook: drop all registered schemas.
    pub fn clear(&self) {
        self.schemas.clear();
    }
}
