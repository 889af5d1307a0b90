//! Typed model of job input-schema documents.
//!
//! Raw documents are loosely typed JSON. Parsing is total: every property
//! node becomes one [`PropertyKind`], with anything the gateway cannot
//! express landing in [`PropertyKind::Unsupported`] so later passes can
//! drop it without failing the whole document.

use indexmap::IndexMap;
use serde_json::{Map, Value};

pub type JsonObject = Map<String, Value>;

/// Scalar JSON Schema types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveType {
    String,
    Integer,
    Number,
    Boolean,
}

impl PrimitiveType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(Self::String),
            "integer" => Some(Self::Integer),
            "number" => Some(Self::Number),
            "boolean" => Some(Self::Boolean),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }
}

/// Structural kind of a schema node.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKind {
    Primitive(PrimitiveType),
    Enum {
        base: PrimitiveType,
        values: Vec<Value>,
    },
    Array {
        items: Option<Box<PropertySchema>>,
    },
    Object {
        properties: IndexMap<String, PropertySchema>,
        required: Vec<String>,
    },
    /// Type the gateway cannot express; carries the raw type name.
    Unsupported(String),
}

/// One property node with the annotations the gateway keeps.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySchema {
    pub kind: PropertyKind,
    pub title: Option<String>,
    pub description: Option<String>,
    pub editor: Option<String>,
    pub default: Option<Value>,
    pub prefill: Option<Value>,
    pub enum_titles: Vec<String>,
    /// Declared with `"null"` among its types.
    pub nullable: bool,
}

impl PropertySchema {
    pub fn new(kind: PropertyKind) -> Self {
        Self {
            kind,
            title: None,
            description: None,
            editor: None,
            default: None,
            prefill: None,
            enum_titles: Vec::new(),
            nullable: false,
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_editor(mut self, editor: impl Into<String>) -> Self {
        self.editor = Some(editor.into());
        self
    }

    /// Parse a raw property node. Never fails.
    pub fn parse(raw: &Value) -> Self {
        let Some(obj) = raw.as_object() else {
            return Self::new(PropertyKind::Unsupported(type_label(raw)));
        };

        let type_name = declared_type(obj);
        let kind = match (type_name.as_deref(), obj.get("enum")) {
            (_, Some(Value::Array(values))) if !values.is_empty() => {
                let base = type_name
                    .as_deref()
                    .and_then(PrimitiveType::parse)
                    .unwrap_or(PrimitiveType::String);
                PropertyKind::Enum {
                    base,
                    values: values.clone(),
                }
            }
            (Some("array"), _) => PropertyKind::Array {
                items: obj
                    .get("items")
                    .filter(|items| items.is_object())
                    .map(|items| Box::new(Self::parse(items))),
            },
            (Some("object"), _) => {
                let (properties, required) = parse_properties(obj);
                PropertyKind::Object {
                    properties,
                    required,
                }
            }
            (None, _) if obj.contains_key("properties") => {
                let (properties, required) = parse_properties(obj);
                PropertyKind::Object {
                    properties,
                    required,
                }
            }
            (Some(other), _) => match PrimitiveType::parse(other) {
                Some(primitive) => PropertyKind::Primitive(primitive),
                None => PropertyKind::Unsupported(other.to_string()),
            },
            (None, _) => PropertyKind::Unsupported("<missing>".to_string()),
        };

        Self {
            kind,
            title: string_field(obj, "title"),
            description: string_field(obj, "description"),
            editor: string_field(obj, "editor"),
            default: obj.get("default").cloned(),
            prefill: obj.get("prefill").cloned(),
            enum_titles: obj
                .get("enumTitles")
                .and_then(Value::as_array)
                .map(|titles| {
                    titles
                        .iter()
                        .filter_map(|t| t.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            nullable: accepts_null(obj),
        }
    }

    /// Render back into a JSON Schema node. The editor hint is not emitted.
    pub fn to_value(&self) -> Value {
        let mut out = JsonObject::new();
        match &self.kind {
            PropertyKind::Primitive(primitive) => {
                out.insert("type".into(), primitive.as_str().into());
            }
            PropertyKind::Enum { base, values } => {
                out.insert("type".into(), base.as_str().into());
                out.insert("enum".into(), Value::Array(values.clone()));
            }
            PropertyKind::Array { items } => {
                out.insert("type".into(), "array".into());
                if let Some(items) = items {
                    out.insert("items".into(), items.to_value());
                }
            }
            PropertyKind::Object {
                properties,
                required,
            } => {
                out.insert("type".into(), "object".into());
                out.insert("properties".into(), render_properties(properties));
                if !required.is_empty() {
                    out.insert("required".into(), required.clone().into());
                }
            }
            PropertyKind::Unsupported(type_name) => {
                out.insert("type".into(), type_name.clone().into());
            }
        }
        if self.nullable {
            if let Some(Value::String(type_name)) = out.remove("type") {
                out.insert("type".into(), Value::from(vec![type_name, "null".to_string()]));
            }
            if let Some(Value::Array(values)) = out.get_mut("enum") {
                if !values.contains(&Value::Null) {
                    values.push(Value::Null);
                }
            }
        }
        if let Some(title) = &self.title {
            out.insert("title".into(), title.clone().into());
        }
        if let Some(description) = &self.description {
            out.insert("description".into(), description.clone().into());
        }
        if !self.enum_titles.is_empty() {
            out.insert("enumTitles".into(), self.enum_titles.clone().into());
        }
        if let Some(default) = &self.default {
            out.insert("default".into(), default.clone());
        }
        if let Some(prefill) = &self.prefill {
            out.insert("prefill".into(), prefill.clone());
        }
        Value::Object(out)
    }
}

/// Top-level input schema of a job (always an object).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputSchema {
    pub title: Option<String>,
    pub properties: IndexMap<String, PropertySchema>,
    pub required: Vec<String>,
}

impl InputSchema {
    /// Parse a raw document. A missing or non-object document yields an
    /// empty schema.
    pub fn parse(raw: Option<&Value>) -> Self {
        let Some(obj) = raw.and_then(Value::as_object) else {
            return Self::default();
        };
        let (properties, required) = parse_properties(obj);
        Self {
            title: string_field(obj, "title"),
            properties,
            required,
        }
    }

    pub fn to_object(&self) -> JsonObject {
        let mut out = JsonObject::new();
        if let Some(title) = &self.title {
            out.insert("title".into(), title.clone().into());
        }
        out.insert("type".into(), "object".into());
        out.insert("properties".into(), render_properties(&self.properties));
        if !self.required.is_empty() {
            out.insert("required".into(), self.required.clone().into());
        }
        out
    }
}

fn parse_properties(obj: &JsonObject) -> (IndexMap<String, PropertySchema>, Vec<String>) {
    let properties = obj
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .map(|(name, raw)| (name.clone(), PropertySchema::parse(raw)))
                .collect()
        })
        .unwrap_or_default();
    let required = obj
        .get("required")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(|n| n.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    (properties, required)
}

fn render_properties(properties: &IndexMap<String, PropertySchema>) -> Value {
    Value::Object(
        properties
            .iter()
            .map(|(name, prop)| (name.clone(), prop.to_value()))
            .collect(),
    )
}

/// `type` may be a string or a list such as `["string", "null"]`; for a
/// list, the first non-null entry.
fn declared_type(obj: &JsonObject) -> Option<String> {
    match obj.get("type")? {
        Value::String(s) => Some(s.clone()),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null")
            .map(str::to_string),
        other => Some(type_label(other)),
    }
}

fn accepts_null(obj: &JsonObject) -> bool {
    matches!(obj.get("type"), Some(Value::Array(types)) if types.iter().any(|t| t == "null"))
}

fn string_field(obj: &JsonObject, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn type_label(value: &Value) -> String {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number-literal",
        Value::String(_) => "string-literal",
        Value::Array(_) => "array-literal",
        Value::Object(_) => "object-literal",
    }
    .to_string()
}
