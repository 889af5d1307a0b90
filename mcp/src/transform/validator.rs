//! Compiled input schemas with permissive argument coercion.

use std::{fmt, sync::Arc};

use jsonschema::{Draft, JSONSchema};
use serde_json::{Number, Value};

use super::types::JsonObject;
use crate::error::{McpError, McpResult};

/// A schema document and the validator compiled from it.
///
/// The two are built together and never updated independently.
pub struct CompiledSchema {
    document: Arc<JsonObject>,
    validator: JSONSchema,
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("document", &self.document)
            .finish_non_exhaustive()
    }
}

impl CompiledSchema {
    /// Compile a schema document. Unknown keywords and `format` are ignored.
    pub fn compile(tool: &str, document: JsonObject) -> McpResult<Self> {
        let validator = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .should_validate_formats(false)
            .compile(&Value::Object(document.clone()))
            .map_err(|e| McpError::SchemaCompilationFailed {
                tool: tool.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            document: Arc::new(document),
            validator,
        })
    }

    pub fn document(&self) -> &Arc<JsonObject> {
        &self.document
    }

    /// Validate arguments, returning every validator error on mismatch.
    pub fn validate(&self, arguments: &Value) -> Result<(), Vec<String>> {
        self.validator
            .validate(arguments)
            .map_err(|errors| errors.map(|e| e.to_string()).collect())
    }

    /// Coerce arguments towards the declared types in place.
    ///
    /// Arrays accept comma-joined strings or a bare scalar; numbers and
    /// booleans accept their string spellings; strings accept scalars.
    pub fn coerce(&self, arguments: &mut JsonObject) {
        let Some(props) = self.document.get("properties").and_then(Value::as_object) else {
            return;
        };
        coerce_object(arguments, props);
    }
}

fn coerce_object(args: &mut JsonObject, props: &JsonObject) {
    for (key, value) in args.iter_mut() {
        if let Some(schema) = props.get(key) {
            coerce_value(value, schema);
        }
    }
}

fn coerce_value(value: &mut Value, schema: &Value) {
    if value.is_null() {
        return;
    }
    let type_name = match schema.get("type") {
        Some(Value::String(s)) => s.as_str(),
        Some(Value::Array(types)) => {
            match types.iter().filter_map(Value::as_str).find(|t| *t != "null") {
                Some(t) => t,
                None => return,
            }
        }
        _ => return,
    };

    match type_name {
        "array" => {
            if let Value::String(s) = value {
                let parts = s
                    .split(',')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(|part| Value::String(part.to_string()))
                    .collect();
                *value = Value::Array(parts);
            } else if !value.is_array() && !value.is_null() {
                let scalar = value.take();
                *value = Value::Array(vec![scalar]);
            }
            if let (Some(items), Some(item_schema)) = (value.as_array_mut(), schema.get("items")) {
                for item in items {
                    coerce_value(item, item_schema);
                }
            }
        }
        "integer" => {
            if let Some(n) = value.as_str().and_then(|s| s.trim().parse::<i64>().ok()) {
                *value = Value::from(n);
            }
        }
        "number" => {
            if let Some(n) = value
                .as_str()
                .and_then(|s| s.trim().parse::<f64>().ok())
                .and_then(Number::from_f64)
            {
                *value = Value::Number(n);
            }
        }
        "boolean" => {
            if let Some(b) = value.as_str().and_then(|s| match s.trim() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            }) {
                *value = Value::Bool(b);
            }
        }
        "string" => match value {
            Value::Number(n) => *value = Value::String(n.to_string()),
            Value::Bool(b) => *value = Value::String(b.to_string()),
            _ => {}
        },
        "object" => {
            if let (Some(inner), Some(props)) = (
                value.as_object_mut(),
                schema.get("properties").and_then(Value::as_object),
            ) {
                coerce_object(inner, props);
            }
        }
        _ => {}
    }
}
