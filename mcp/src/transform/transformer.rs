//! Input-schema transformer for job tools.

use indexmap::IndexMap;
use serde_json::Value;
use tracing::warn;

use super::{
    types::{InputSchema, PrimitiveType, PropertyKind, PropertySchema},
    validator::CompiledSchema,
};
use crate::error::McpResult;

pub const MAX_DESCRIPTION_LENGTH: usize = 500;
pub const MAX_ENUM_TITLES_LENGTH: usize = 200;
pub const MAX_ENUM_EXAMPLES: usize = 20;
pub const REQUIRED_MARKER: &str = "**REQUIRED**";

/// Converts raw job input schemas into validated tool schemas.
///
/// The passes run in a fixed order; later passes read what earlier ones wrote:
/// 1. [`mark_required`](Self::mark_required)
/// 2. [`build_nested`](Self::build_nested)
/// 3. [`filter`](Self::filter)
/// 4. [`shorten`](Self::shorten)
/// 5. [`enrich_enums`](Self::enrich_enums)
/// 6. [`CompiledSchema::compile`]
pub struct SchemaTransformer;

impl SchemaTransformer {
    /// Run every pass and compile the result.
    pub fn transform(tool_name: &str, raw: Option<&Value>) -> McpResult<CompiledSchema> {
        let schema = InputSchema::parse(raw);
        let schema = Self::mark_required(schema);
        let schema = Self::build_nested(schema);
        let schema = Self::filter(schema);
        let schema = Self::shorten(schema);
        let schema = Self::enrich_enums(schema);
        CompiledSchema::compile(tool_name, schema.to_object())
    }

    /// Filter and shorten only. Used for human-facing schema previews.
    pub fn preview(raw: Option<&Value>) -> InputSchema {
        Self::shorten(Self::filter(InputSchema::parse(raw)))
    }

    /// Prefix descriptions of required properties with a visible marker.
    pub fn mark_required(mut schema: InputSchema) -> InputSchema {
        for name in &schema.required {
            if let Some(prop) = schema.properties.get_mut(name) {
                prop.description = Some(match prop.description.take() {
                    Some(desc) => format!("{} {}", REQUIRED_MARKER, desc),
                    None => REQUIRED_MARKER.to_string(),
                });
            }
        }
        schema
    }

    /// Expand composite editor hints into explicit nested schemas.
    pub fn build_nested(mut schema: InputSchema) -> InputSchema {
        for prop in schema.properties.values_mut() {
            let Some(editor) = prop.editor.as_deref() else {
                continue;
            };
            let expanded = match editor {
                "proxy" => Some(proxy_object()),
                "requestListSources" => Some(request_list_sources()),
                "keyValue" => Some(key_value_list()),
                "stringList" | "globs" => match &prop.kind {
                    PropertyKind::Array { items: None } => Some(PropertyKind::Array {
                        items: Some(Box::new(PropertySchema::new(PropertyKind::Primitive(
                            PrimitiveType::String,
                        )))),
                    }),
                    _ => None,
                },
                _ => None,
            };
            if let Some(kind) = expanded {
                prop.kind = kind;
            }
        }
        schema
    }

    /// Drop hidden properties and properties of unsupported type.
    pub fn filter(mut schema: InputSchema) -> InputSchema {
        schema.properties = filter_properties(std::mem::take(&mut schema.properties));
        schema
            .required
            .retain(|name| schema.properties.contains_key(name));
        schema
    }

    /// Bound description and enum-title text.
    pub fn shorten(mut schema: InputSchema) -> InputSchema {
        for prop in schema.properties.values_mut() {
            shorten_property(prop);
        }
        schema
    }

    /// Append the accepted values of enum properties to their description.
    pub fn enrich_enums(mut schema: InputSchema) -> InputSchema {
        for prop in schema.properties.values_mut() {
            enrich_property(prop);
        }
        schema
    }
}

fn filter_properties(
    properties: IndexMap<String, PropertySchema>,
) -> IndexMap<String, PropertySchema> {
    properties
        .into_iter()
        .filter_map(|(name, prop)| {
            if is_hidden(&name, &prop) {
                return None;
            }
            if let PropertyKind::Unsupported(type_name) = &prop.kind {
                warn!(
                    "Dropping property '{}' with unsupported type '{}'",
                    name, type_name
                );
                return None;
            }
            Some((name, filter_nested(prop)))
        })
        .collect()
}

fn filter_nested(mut prop: PropertySchema) -> PropertySchema {
    prop.kind = match prop.kind {
        PropertyKind::Object {
            properties,
            mut required,
        } => {
            let properties = filter_properties(properties);
            required.retain(|name| properties.contains_key(name));
            PropertyKind::Object {
                properties,
                required,
            }
        }
        PropertyKind::Array { items: Some(items) } => match items.kind {
            PropertyKind::Unsupported(ref type_name) => {
                warn!("Dropping unsupported array item type '{}'", type_name);
                PropertyKind::Array { items: None }
            }
            _ => PropertyKind::Array {
                items: Some(Box::new(filter_nested(*items))),
            },
        },
        other => other,
    };
    prop
}

fn is_hidden(name: &str, prop: &PropertySchema) -> bool {
    name.starts_with('_') || prop.editor.as_deref() == Some("hidden")
}

fn shorten_property(prop: &mut PropertySchema) {
    if let Some(desc) = prop.description.as_mut() {
        if desc.chars().count() > MAX_DESCRIPTION_LENGTH {
            let mut cut: String = desc.chars().take(MAX_DESCRIPTION_LENGTH).collect();
            cut.push_str("...");
            *desc = cut;
        }
    }

    let mut budget = 0usize;
    prop.enum_titles.retain(|title| {
        budget += title.chars().count();
        budget <= MAX_ENUM_TITLES_LENGTH
    });

    match &mut prop.kind {
        PropertyKind::Object { properties, .. } => {
            properties.values_mut().for_each(shorten_property);
        }
        PropertyKind::Array { items: Some(items) } => shorten_property(items),
        _ => {}
    }
}

fn enrich_property(prop: &mut PropertySchema) {
    let values = match &prop.kind {
        PropertyKind::Enum { values, .. } => values,
        PropertyKind::Array { items: Some(items) } => match &items.kind {
            PropertyKind::Enum { values, .. } => values,
            _ => return,
        },
        _ => return,
    };

    let examples = values
        .iter()
        .take(MAX_ENUM_EXAMPLES)
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ");

    prop.description = Some(match prop.description.take() {
        Some(desc) => format!("{}\nPossible values: {}", desc, examples),
        None => format!("Possible values: {}", examples),
    });
}

fn proxy_object() -> PropertyKind {
    let properties = IndexMap::from([
        (
            "useApifyProxy".to_string(),
            PropertySchema::new(PropertyKind::Primitive(PrimitiveType::Boolean))
                .with_title("Use proxy")
                .with_description("Whether to route the job's traffic through a proxy."),
        ),
        (
            "apifyProxyGroups".to_string(),
            PropertySchema::new(PropertyKind::Array {
                items: Some(Box::new(PropertySchema::new(PropertyKind::Primitive(
                    PrimitiveType::String,
                )))),
            })
            .with_title("Proxy groups")
            .with_description("Proxy groups to use, e.g. RESIDENTIAL."),
        ),
        (
            "apifyProxyCountry".to_string(),
            PropertySchema::new(PropertyKind::Primitive(PrimitiveType::String))
                .with_title("Proxy country")
                .with_description("Two-letter country code of the proxy exit node."),
        ),
    ]);
    PropertyKind::Object {
        properties,
        required: Vec::new(),
    }
}

fn request_list_sources() -> PropertyKind {
    let methods = ["GET", "POST", "PUT", "DELETE", "HEAD", "PATCH"]
        .into_iter()
        .map(Value::from)
        .collect();
    let record = PropertySchema::new(PropertyKind::Object {
        properties: IndexMap::from([
            (
                "url".to_string(),
                PropertySchema::new(PropertyKind::Primitive(PrimitiveType::String))
                    .with_title("URL")
                    .with_description("URL of the page to start from."),
            ),
            (
                "method".to_string(),
                PropertySchema::new(PropertyKind::Enum {
                    base: PrimitiveType::String,
                    values: methods,
                })
                .with_title("Method"),
            ),
        ]),
        required: vec!["url".to_string()],
    });
    PropertyKind::Array {
        items: Some(Box::new(record)),
    }
}

fn key_value_list() -> PropertyKind {
    let string = || PropertySchema::new(PropertyKind::Primitive(PrimitiveType::String));
    let record = PropertySchema::new(PropertyKind::Object {
        properties: IndexMap::from([
            ("key".to_string(), string().with_title("Key")),
            ("value".to_string(), string().with_title("Value")),
        ]),
        required: vec!["key".to_string(), "value".to_string()],
    });
    PropertyKind::Array {
        items: Some(Box::new(record)),
    }
}
