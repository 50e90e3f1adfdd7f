//! Result-schema validation
//!
//! Capabilities declare the shape of their results as JSON Schema; payloads
//! are checked with `jsonschema` before they reach the conversation.

use jsonschema::Validator;
use serde_json::Value;

/// Compile `schema`, failing when it is not a valid JSON Schema
pub fn compile(schema: &Value) -> Result<Validator, String> {
    Validator::new(schema).map_err(|e| format!("invalid result schema: {}", e))
}

/// Check `value` against `schema`, listing every violation
pub fn validate(value: &Value, schema: &Value) -> Result<(), String> {
    let validator = compile(schema)?;
    if validator.is_valid(value) {
        return Ok(());
    }
    let errors: Vec<String> = validator.iter_errors(value).map(|e| e.to_string()).collect();
    Err(errors.join("; "))
}
