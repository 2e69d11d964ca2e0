//! Compiled JSON-schema validator cache, keyed by the schema's canonical
//! JSON text (spec §4.5.3 step 8, §5 "shared resources"). Compiling a
//! `jsonschema::Validator` is not free; agent nodes that reuse the same
//! `jsonSchema` across many runs shouldn't pay for it twice.

use std::sync::Arc;

use dashmap::DashMap;
use jsonschema::Validator;
use once_cell::sync::Lazy;
use serde_json::Value;

use crate::error::AgentError;

static CACHE: Lazy<DashMap<String, Arc<Validator>>> = Lazy::new(DashMap::new);

fn canonical_key(schema: &Value) -> String {
    serde_json::to_string(schema).unwrap_or_default()
}

fn compiled(schema: &Value) -> Result<Arc<Validator>, AgentError> {
    let key = canonical_key(schema);
    if let Some(existing) = CACHE.get(&key) {
        return Ok(existing.clone());
    }
    let validator = jsonschema::validator_for(schema).map_err(|_| AgentError::InvalidJsonSchema)?;
    let validator = Arc::new(validator);
    CACHE.insert(key, validator.clone());
    Ok(validator)
}

/// Validates `output` against `schema`, compiling (and caching) the
/// validator on first use. Spec §4.5.3 step 8: a schema mismatch is
/// `INVALID_AGENT_JSON_OUTPUT`, distinct from an uncompilable schema
/// (`INVALID_JSON_SCHEMA`).
pub fn validate(schema: &Value, output: &Value) -> Result<(), AgentError> {
    let validator = compiled(schema)?;
    if validator.is_valid(output) {
        Ok(())
    } else {
        Err(AgentError::InvalidAgentJsonOutput)
    }
}
