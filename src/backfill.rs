//! Default-value backfill for required fields the mapping left empty.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    record::{get_path, get_path_mut, is_present, set_path},
    schema::{
        ComputedDefault, DefaultValue, Descend, FieldKind, FieldNode, NamedField, Schema,
        walk_fields,
    },
};

/// Caller context handed to computed defaults.
#[derive(Debug, Clone)]
pub struct DefaultContext {
    pub user: Option<Value>,
    pub locale: Option<String>,
    pub now: DateTime<Utc>,
}

impl Default for DefaultContext {
    fn default() -> Self {
        Self {
            user: None,
            locale: None,
            now: Utc::now(),
        }
    }
}

impl DefaultContext {
    pub fn with_user(mut self, user: Value) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    fn user_id(&self) -> Result<Value> {
        match &self.user {
            Some(Value::Object(user)) => user
                .get("id")
                .cloned()
                .ok_or_else(|| anyhow!("user in context has no id")),
            Some(other) => Ok(other.clone()),
            None => Err(anyhow!("no user in context")),
        }
    }
}

/// Looks up a named default provider usable from declarative schemas.
pub fn builtin_default(name: &str) -> Option<ComputedDefault> {
    let computed = match name {
        "user" => ComputedDefault::new(name, |ctx: &DefaultContext| {
            ctx.user.clone().ok_or_else(|| anyhow!("no user in context"))
        }),
        "user.id" => ComputedDefault::new(name, |ctx: &DefaultContext| ctx.user_id()),
        "now" => ComputedDefault::new(name, |ctx: &DefaultContext| {
            Ok(Value::String(ctx.now.to_rfc3339()))
        }),
        "today" => ComputedDefault::new(name, |ctx: &DefaultContext| {
            Ok(Value::String(ctx.now.format("%Y-%m-%d").to_string()))
        }),
        "uuid" => ComputedDefault::new(name, |_: &DefaultContext| {
            Ok(Value::String(Uuid::new_v4().to_string()))
        }),
        "locale" => ComputedDefault::new(name, |ctx: &DefaultContext| {
            ctx.locale
                .clone()
                .map(Value::String)
                .ok_or_else(|| anyhow!("no locale in context"))
        }),
        _ => return None,
    };
    Some(computed)
}

/// Fills every required field that declares a default and has no mapped value.
pub fn backfill(document: &mut Map<String, Value>, schema: &Schema, ctx: &DefaultContext) {
    backfill_fields(document, &schema.fields, ctx);
}

fn backfill_fields(target: &mut Map<String, Value>, fields: &[FieldNode], ctx: &DefaultContext) {
    walk_fields(fields, "", &mut |path: &str, field: &NamedField| {
        apply_default(target, path, field, ctx);
        match &field.kind {
            FieldKind::Group(_) => Descend::Into,
            FieldKind::Array(children) | FieldKind::Blocks(children) => {
                if let Some(Value::Array(elements)) = get_path_mut(target, path) {
                    for element in elements.iter_mut() {
                        if let Value::Object(object) = element {
                            backfill_fields(object, children, ctx);
                        }
                    }
                }
                Descend::Skip
            }
            _ => Descend::Skip,
        }
    });
}

fn apply_default(
    target: &mut Map<String, Value>,
    path: &str,
    field: &NamedField,
    ctx: &DefaultContext,
) {
    let Some(default) = field.default.as_ref().filter(|_| field.required) else {
        return;
    };
    if get_path(target, path).is_some_and(is_present) {
        return;
    }
    let value = match default {
        DefaultValue::Static(value) => value.clone(),
        DefaultValue::Computed(computed) => match computed.evaluate(ctx) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    "Computing default '{}' for '{path}' failed: {err}",
                    computed.name
                );
                return;
            }
        },
    };
    debug!("Backfilled default for '{path}'");
    if let Err(err) = set_path(target, path, value) {
        warn!("Writing default for '{path}' failed: {err}");
    }
}
