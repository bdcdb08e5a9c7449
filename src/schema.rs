//! Collection schema model, load-time decoding, and field flattening.
//!
//! This module owns the [`FieldNode`] tree (the canonical representation of a
//! collection's field declarations), the [`FieldKind`] discriminated union,
//! and [`CollectionField`], the flattened per-path metadata consumed by the
//! recommender, the configure step, and sample generation.
//!
//! ## Responsibilities
//!
//! - Decoding loosely-typed declarations once, rejecting unknown `type` tags
//!   and incomplete relationship/upload declarations up front
//! - Generic recursive traversal through [`walk_fields`]
//! - Layout nodes (`tabs`, `row`, `collapsible`) are transparent to paths
//! - Flattening named fields into dotted paths (`group` children included,
//!   `array`/`blocks` children resolved on demand via [`Schema::field_at`])
//! - Advisory example values per field type and name

use std::{collections::BTreeMap, fmt, sync::Arc};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    backfill::{DefaultContext, builtin_default},
    error::{ImportError, ImportResult},
};

pub const ID_FIELD: &str = "id";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    pub fields: Vec<FieldNode>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawField")]
pub enum FieldNode {
    Layout(LayoutField),
    Named(NamedField),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    Tabs,
    Row,
    Collapsible,
}

#[derive(Debug, Clone)]
pub struct LayoutField {
    pub kind: LayoutKind,
    pub fields: Vec<FieldNode>,
}

#[derive(Debug, Clone)]
pub struct NamedField {
    pub name: String,
    pub label: Option<String>,
    pub kind: FieldKind,
    pub required: bool,
    pub default: Option<DefaultValue>,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub relation_to: Vec<String>,
    pub has_many: bool,
}

impl Relation {
    pub fn target(&self) -> String {
        self.relation_to.join(" | ")
    }
}

#[derive(Debug, Clone)]
pub enum FieldKind {
    Text,
    Textarea,
    Number,
    Checkbox,
    Date,
    Email,
    Select,
    Radio,
    Json,
    Code,
    Point,
    RichText,
    Relationship(Relation),
    Upload(Relation),
    Group(Vec<FieldNode>),
    Array(Vec<FieldNode>),
    Blocks(Vec<FieldNode>),
}

impl FieldKind {
    pub fn tag(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Textarea => "textarea",
            FieldKind::Number => "number",
            FieldKind::Checkbox => "checkbox",
            FieldKind::Date => "date",
            FieldKind::Email => "email",
            FieldKind::Select => "select",
            FieldKind::Radio => "radio",
            FieldKind::Json => "json",
            FieldKind::Code => "code",
            FieldKind::Point => "point",
            FieldKind::RichText => "richText",
            FieldKind::Relationship(_) => "relationship",
            FieldKind::Upload(_) => "upload",
            FieldKind::Group(_) => "group",
            FieldKind::Array(_) => "array",
            FieldKind::Blocks(_) => "blocks",
        }
    }

    pub fn relation(&self) -> Option<&Relation> {
        match self {
            FieldKind::Relationship(relation) | FieldKind::Upload(relation) => Some(relation),
            _ => None,
        }
    }

    pub fn children(&self) -> Option<&[FieldNode]> {
        match self {
            FieldKind::Group(fields) | FieldKind::Array(fields) | FieldKind::Blocks(fields) => {
                Some(fields)
            }
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            FieldKind::Relationship(relation) => format!("relationship ({})", relation.target()),
            FieldKind::Upload(relation) => format!("upload ({})", relation.target()),
            other => other.tag().to_string(),
        }
    }
}

/// A schema-declared default: either a literal or a function of the caller context.
#[derive(Clone)]
pub enum DefaultValue {
    Static(Value),
    Computed(ComputedDefault),
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Static(value) => f.debug_tuple("Static").field(value).finish(),
            DefaultValue::Computed(computed) => {
                f.debug_tuple("Computed").field(&computed.name).finish()
            }
        }
    }
}

type DefaultFn = dyn Fn(&DefaultContext) -> Result<Value> + Send + Sync;

#[derive(Clone)]
pub struct ComputedDefault {
    pub name: String,
    func: Arc<DefaultFn>,
}

impl ComputedDefault {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&DefaultContext) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn evaluate(&self, ctx: &DefaultContext) -> Result<Value> {
        (self.func)(ctx)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawLabel {
    Text(String),
    Localized(BTreeMap<String, String>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRelationTo {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawOption {
    Value(String),
    Labeled { value: String },
}

#[derive(Debug, Deserialize)]
struct RawContainer {
    #[serde(default)]
    fields: Vec<FieldNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawField {
    #[serde(rename = "type")]
    field_type: String,
    name: Option<String>,
    label: Option<RawLabel>,
    #[serde(default)]
    required: bool,
    default_value: Option<Value>,
    default_from: Option<String>,
    #[serde(default)]
    fields: Vec<FieldNode>,
    #[serde(default)]
    tabs: Vec<RawContainer>,
    #[serde(default)]
    blocks: Vec<RawContainer>,
    relation_to: Option<RawRelationTo>,
    #[serde(default)]
    has_many: bool,
    #[serde(default)]
    options: Vec<RawOption>,
}

impl TryFrom<RawField> for FieldNode {
    type Error = String;

    fn try_from(raw: RawField) -> std::result::Result<Self, Self::Error> {
        let layout = match raw.field_type.as_str() {
            "tabs" => Some(LayoutKind::Tabs),
            "row" => Some(LayoutKind::Row),
            "collapsible" => Some(LayoutKind::Collapsible),
            _ => None,
        };
        if let Some(kind) = layout {
            let mut fields = raw.fields;
            fields.extend(raw.tabs.into_iter().flat_map(|tab| tab.fields));
            return Ok(FieldNode::Layout(LayoutField { kind, fields }));
        }

        let name = raw
            .name
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| format!("field of type '{}' is missing a name", raw.field_type))?;

        let has_many = raw.has_many;
        let kind = match raw.field_type.as_str() {
            "text" => FieldKind::Text,
            "textarea" => FieldKind::Textarea,
            "number" => FieldKind::Number,
            "checkbox" => FieldKind::Checkbox,
            "date" => FieldKind::Date,
            "email" => FieldKind::Email,
            "select" => FieldKind::Select,
            "radio" => FieldKind::Radio,
            "json" => FieldKind::Json,
            "code" => FieldKind::Code,
            "point" => FieldKind::Point,
            "richText" => FieldKind::RichText,
            "relationship" => FieldKind::Relationship(relation(&name, raw.relation_to, has_many)?),
            "upload" => FieldKind::Upload(relation(&name, raw.relation_to, has_many)?),
            "group" => FieldKind::Group(raw.fields),
            "array" => FieldKind::Array(raw.fields),
            "blocks" => {
                let mut fields = raw.fields;
                fields.extend(raw.blocks.into_iter().flat_map(|block| block.fields));
                FieldKind::Blocks(fields)
            }
            other => return Err(format!("field '{name}' has unknown type '{other}'")),
        };

        let default = match (raw.default_value, raw.default_from) {
            (Some(_), Some(_)) => {
                return Err(format!(
                    "field '{name}' declares both defaultValue and defaultFrom"
                ));
            }
            (Some(value), None) => Some(DefaultValue::Static(value)),
            (None, Some(provider)) => Some(DefaultValue::Computed(
                builtin_default(&provider).ok_or_else(|| {
                    format!("field '{name}' uses unknown default provider '{provider}'")
                })?,
            )),
            (None, None) => None,
        };

        let label = match raw.label {
            Some(RawLabel::Text(text)) => Some(text),
            Some(RawLabel::Localized(map)) => map.get("en").cloned(),
            None => None,
        }
        .filter(|label| !label.trim().is_empty());

        let options = raw
            .options
            .into_iter()
            .map(|option| match option {
                RawOption::Value(value) | RawOption::Labeled { value } => value,
            })
            .collect();

        Ok(FieldNode::Named(NamedField {
            name,
            label,
            kind,
            required: raw.required,
            default,
            options,
        }))
    }
}

fn relation(
    name: &str,
    relation_to: Option<RawRelationTo>,
    has_many: bool,
) -> std::result::Result<Relation, String> {
    let relation_to = match relation_to {
        Some(RawRelationTo::One(target)) => vec![target],
        Some(RawRelationTo::Many(targets)) if !targets.is_empty() => targets,
        _ => return Err(format!("field '{name}' requires relationTo")),
    };
    Ok(Relation {
        relation_to,
        has_many,
    })
}

/// Traversal decision returned by a [`FieldVisitor`] for container fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descend {
    Into,
    Skip,
}

pub trait FieldVisitor {
    fn visit(&mut self, path: &str, field: &NamedField) -> Descend;
}

impl<F> FieldVisitor for F
where
    F: FnMut(&str, &NamedField) -> Descend,
{
    fn visit(&mut self, path: &str, field: &NamedField) -> Descend {
        self(path, field)
    }
}

pub fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// Walks `fields` depth-first, calling `visitor` for every named field.
pub fn walk_fields<V>(fields: &[FieldNode], prefix: &str, visitor: &mut V)
where
    V: FieldVisitor + ?Sized,
{
    for node in fields {
        match node {
            FieldNode::Layout(layout) => walk_fields(&layout.fields, prefix, visitor),
            FieldNode::Named(field) => {
                let path = join_path(prefix, &field.name);
                if visitor.visit(&path, field) == Descend::Into {
                    if let Some(children) = field.kind.children() {
                        walk_fields(children, &path, visitor);
                    }
                }
            }
        }
    }
}

fn find_named<'a>(fields: &'a [FieldNode], name: &str) -> Option<&'a NamedField> {
    fields.iter().find_map(|node| match node {
        FieldNode::Layout(layout) => find_named(&layout.fields, name),
        FieldNode::Named(field) if field.name == name => Some(field),
        FieldNode::Named(_) => None,
    })
}

/// Flattened, read-only metadata for one schema path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionField {
    pub path: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub type_description: String,
    /// Effective requirement: declared required and no default to fall back on.
    pub required: bool,
    pub declared_required: bool,
    pub has_default_value: bool,
    pub example: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_many: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl CollectionField {
    fn synthetic_id() -> Self {
        CollectionField {
            path: ID_FIELD.to_string(),
            label: "ID".to_string(),
            field_type: "text".to_string(),
            type_description: "text".to_string(),
            required: false,
            declared_required: false,
            has_default_value: true,
            example: "Unique record identifier".to_string(),
            relation_to: None,
            has_many: None,
            options: Vec::new(),
        }
    }

    fn from_named(path: String, field: &NamedField) -> Self {
        let has_default_value = field.default.is_some();
        let relation = field.kind.relation();
        CollectionField {
            label: field.label.clone().unwrap_or_else(|| field.name.clone()),
            field_type: field.kind.tag().to_string(),
            type_description: field.kind.describe(),
            required: field.required && !has_default_value,
            declared_required: field.required,
            has_default_value,
            example: field_example(field),
            relation_to: relation.map(Relation::target),
            has_many: relation.map(|r| r.has_many),
            options: field.options.clone(),
            path,
        }
    }

    /// The last path segment, used for name-keyed heuristics.
    pub fn name(&self) -> &str {
        self.path.rsplit('.').next().unwrap_or(&self.path)
    }
}

impl Schema {
    pub fn new(fields: Vec<FieldNode>) -> Self {
        Schema { fields }
    }

    pub fn from_json(value: Value) -> ImportResult<Self> {
        serde_json::from_value(value).map_err(|err| ImportError::Schema(err.to_string()))
    }

    /// Flattens the tree into per-path metadata, synthetic `id` first.
    pub fn flatten(&self) -> Vec<CollectionField> {
        let mut flattened = vec![CollectionField::synthetic_id()];
        walk_fields(&self.fields, "", &mut |path: &str, field: &NamedField| {
            flattened.push(CollectionField::from_named(path.to_string(), field));
            if matches!(field.kind, FieldKind::Group(_)) {
                Descend::Into
            } else {
                Descend::Skip
            }
        });
        flattened
    }

    /// Resolves a dotted path through layouts, groups, arrays, and blocks.
    pub fn field_at(&self, path: &str) -> Option<&NamedField> {
        let mut segments = path.split('.');
        let mut current = find_named(&self.fields, segments.next()?)?;
        for segment in segments {
            current = find_named(current.kind.children()?, segment)?;
        }
        Some(current)
    }

    pub fn is_known_path(&self, path: &str) -> bool {
        path == ID_FIELD || self.field_at(path).is_some()
    }
}

fn name_contains(name: &str, needles: &[&str]) -> bool {
    let lowered = name.to_lowercase();
    needles.iter().any(|needle| lowered.contains(needle))
}

/// Generates an advisory example value for `field`; never used by coercion.
pub fn field_example(field: &NamedField) -> String {
    match &field.default {
        Some(DefaultValue::Static(Value::String(s))) => return s.clone(),
        Some(DefaultValue::Static(value @ (Value::Number(_) | Value::Bool(_)))) => {
            return value.to_string();
        }
        Some(_) => return "[auto]".to_string(),
        None => {}
    }

    let name = field.name.as_str();
    match &field.kind {
        FieldKind::Checkbox => "true".to_string(),
        FieldKind::Code => "{ \"key\": \"value\" }".to_string(),
        FieldKind::Date => "2024-01-01".to_string(),
        FieldKind::Email => "user@example.com".to_string(),
        FieldKind::Json => "{ \"data\": {} }".to_string(),
        FieldKind::Number if name_contains(name, &["price", "cost"]) => "1000".to_string(),
        FieldKind::Number if name_contains(name, &["quantity", "stock"]) => "50".to_string(),
        FieldKind::Number => "123".to_string(),
        FieldKind::Select | FieldKind::Radio => field
            .options
            .first()
            .cloned()
            .unwrap_or_else(|| "option1".to_string()),
        FieldKind::Relationship(relation) => format!("record id from {}", relation.target()),
        FieldKind::RichText => "Formatted text".to_string(),
        FieldKind::Text if name_contains(name, &["title", "name"]) => "Product name".to_string(),
        FieldKind::Text if name_contains(name, &["slug"]) => "product-name".to_string(),
        FieldKind::Text if name_contains(name, &["sku"]) => "SKU-001".to_string(),
        FieldKind::Text if name_contains(name, &["email"]) => "user@example.com".to_string(),
        FieldKind::Text => "Text value".to_string(),
        FieldKind::Textarea => "Long text description...".to_string(),
        FieldKind::Upload(relation) if relation.has_many => {
            "https://example.com/image1.jpg,https://example.com/image2.jpg".to_string()
        }
        FieldKind::Upload(_) => "https://example.com/image.jpg".to_string(),
        _ => "Value".to_string(),
    }
}
