//! Merging extensions' release schema patches

use crate::error::Result;
use crate::extension_version::{ExtensionVersion, RELEASE_SCHEMA};
use crate::warning::{Merged, Warning};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Stands in for `null` member values while patches are merged
const NULL_SENTINEL: &str = "REPLACE_WITH_NULL";

/// Parents of the objects that are annotated with the extension's name
const ANNOTATED_PARENTS: [&str; 2] = ["definitions", "properties"];

/// Options for merging release schema patches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOptions {
    /// Annotate each definition and field with the name of the extension that
    /// defines it, under this property
    pub extension_field: Option<String>,
    /// The language of the extension name used in annotations
    pub language: String,
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self {
            extension_field: None,
            language: "en".to_string(),
        }
    }
}

impl PatchOptions {
    pub fn with_extension_field(mut self, field: impl Into<String>) -> Self {
        self.extension_field = Some(field.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }
}

/// Apply a JSON Merge Patch (RFC 7396) to a document
///
/// Objects merge key by key, a `null` removes the key, and anything else
/// replaces the target. New keys are appended; existing keys keep their place.
pub fn merge_patch(target: &mut Value, patch: Value) {
    let Value::Object(patch) = patch else {
        *target = patch;
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        for (key, value) in patch {
            if value.is_null() {
                map.shift_remove(&key);
            } else {
                merge_patch(map.entry(key).or_insert(Value::Null), value);
            }
        }
    }
}

/// Set `field_name` to `extension_name` on every object with a `title` that is
/// a member of a `definitions` or `properties` object
pub fn add_extension_field(schema: &mut Value, extension_name: &str, field_name: &str) {
    annotate(schema, extension_name, field_name, &mut Vec::new());
}

fn annotate(value: &mut Value, extension_name: &str, field_name: &str, pointer: &mut Vec<String>) {
    match value {
        Value::Array(items) => {
            for item in items {
                annotate(item, extension_name, field_name, pointer);
            }
        }
        Value::Object(map) => {
            let annotated = pointer.len() > 1
                && ANNOTATED_PARENTS.contains(&pointer[pointer.len() - 2].as_str())
                && map.contains_key("title");
            if annotated {
                map.insert(field_name.to_string(), Value::String(extension_name.to_string()));
            }
            for (key, child) in map.iter_mut() {
                pointer.push(key.clone());
                annotate(child, extension_name, field_name, pointer);
                pointer.pop();
            }
        }
        _ => {}
    }
}

/// Replace `null` member values with the sentinel
fn protect_nulls(value: &mut Value) {
    match value {
        Value::Array(items) => items.iter_mut().for_each(protect_nulls),
        Value::Object(map) => {
            for child in map.values_mut() {
                if child.is_null() {
                    *child = Value::String(NULL_SENTINEL.to_string());
                } else {
                    protect_nulls(child);
                }
            }
        }
        _ => {}
    }
}

/// Replace the sentinel with `null`
fn restore_nulls(value: &mut Value) {
    if value.as_str() == Some(NULL_SENTINEL) {
        *value = Value::Null;
        return;
    }
    match value {
        Value::Array(items) => items.iter_mut().for_each(restore_nulls),
        Value::Object(map) => map.values_mut().for_each(restore_nulls),
        _ => {}
    }
}

/// Merge the extensions' release schema patches, in order, into one patch
///
/// An extension without a patch contributes nothing. An extension whose patch
/// can't be retrieved or decoded is skipped with a warning. Explicit `null`s
/// in a patch survive into the merged patch, so that the field is removed
/// when the merged patch is applied.
pub fn release_schema_patch(
    extensions: &[Arc<ExtensionVersion>],
    options: &PatchOptions,
) -> Result<Merged<Value>> {
    let mut merged = Merged::new(Value::Object(Map::new()));

    for extension in extensions {
        let mut patch = match load_patch(extension, options) {
            Ok(patch) => patch,
            Err(e) if e.is_transport() => {
                merged.warnings.push(
                    Warning::Extension {
                        extension: extension.to_string(),
                        error: e.to_string(),
                    }
                    .emit(),
                );
                continue;
            }
            Err(e) => return Err(e),
        };
        if !patch.is_object() {
            merged.warnings.push(
                Warning::Extension {
                    extension: extension.to_string(),
                    error: format!("{RELEASE_SCHEMA} is not a JSON object"),
                }
                .emit(),
            );
            continue;
        }
        debug!("merging release schema patch of {}", extension);
        protect_nulls(&mut patch);
        merge_patch(&mut merged.value, patch);
    }

    restore_nulls(&mut merged.value);
    Ok(merged)
}

fn load_patch(extension: &ExtensionVersion, options: &PatchOptions) -> Result<Value> {
    let mut patch: Value = serde_json::from_str(&extension.remote_or(RELEASE_SCHEMA, "{}")?)?;
    if let Some(field) = &options.extension_field {
        let name = extension_name(extension, &options.language)?;
        add_extension_field(&mut patch, &name, field);
    }
    Ok(patch)
}

/// The extension's name in a language, falling back to English, then to its id
fn extension_name(extension: &ExtensionVersion, language: &str) -> Result<String> {
    let metadata = extension.metadata()?;
    Ok(metadata
        .name_in(language)
        .or_else(|| metadata.name_in("en"))
        .map(str::to_string)
        .unwrap_or_else(|| extension.to_string()))
}
