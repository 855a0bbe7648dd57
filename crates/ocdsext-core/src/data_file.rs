//! A JSON data file describing versions of extensions
//!
//! The file is keyed by extension id. Each extension has its category, core
//! flag, name, description, latest version and versions. Each version has its
//! locators, publisher, metadata, schemas, codelists, documentation and
//! readme. Text is keyed by language; only English is included.

use crate::error::{Error, Result};
use crate::extension_version::{ExtensionVersion, SCHEMAS};
use crate::registry::{get_latest_version, ExtensionRegistry, VersionFilter};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::warn;

const LANGUAGE: &str = "en";
const README: &str = "README.md";

/// Select the versions named by selectors: `id` for all versions of an
/// extension, or `id==version` for one version. No selectors select all.
pub fn select(registry: &ExtensionRegistry, selectors: &[String]) -> Result<Vec<Arc<ExtensionVersion>>> {
    if selectors.is_empty() {
        return Ok(registry.iter().cloned().collect());
    }

    let mut versions = Vec::new();
    for selector in selectors {
        match selector.split_once("==") {
            Some((id, version)) => {
                versions.push(registry.get(&VersionFilter::new().id(id).version(version))?);
            }
            None => {
                let matched = registry.filter(&VersionFilter::new().id(selector))?;
                if matched.is_empty() {
                    return Err(Error::DoesNotExist(VersionFilter::new().id(selector).to_string()));
                }
                versions.extend(matched);
            }
        }
    }
    Ok(versions)
}

/// Generate the data file for the selected versions
///
/// The registry must have been built with the extensions manifest.
pub fn generate(registry: &ExtensionRegistry, selectors: &[String]) -> Result<Value> {
    let versions = select(registry, selectors)?;
    let mut data = Map::new();

    for version in &versions {
        if !data.contains_key(&version.id) {
            data.insert(
                version.id.clone(),
                json!({
                    "id": version.id,
                    "category": version.category()?,
                    "core": version.core()?,
                    "name": {},
                    "description": {},
                    "latest_version": null,
                    "versions": {},
                }),
            );
        }

        let version_data = version_data(version)?;
        if let Some(Value::Object(entries)) = data.get_mut(&version.id).and_then(|e| e.get_mut("versions")) {
            entries.insert(version.version.clone(), version_data);
        }
    }

    for (id, extension) in data.iter_mut() {
        let same_id: Vec<&ExtensionVersion> = versions
            .iter()
            .filter(|v| v.id == *id)
            .map(Arc::as_ref)
            .collect();
        let latest = get_latest_version(same_id)?;

        let metadata = extension["versions"][&latest.version]["metadata"].clone();
        extension["latest_version"] = Value::String(latest.version.clone());
        extension["name"] = metadata["name"].clone();
        extension["description"] = metadata["description"].clone();
    }

    Ok(Value::Object(data))
}

fn version_data(version: &ExtensionVersion) -> Result<Value> {
    let mut schemas = Map::new();
    for name in SCHEMAS {
        let mut translations = Map::new();
        if let Some(schema) = version.schemas()?.get(name) {
            translations.insert(LANGUAGE.to_string(), schema.clone());
        }
        schemas.insert(name.to_string(), Value::Object(translations));
    }

    let mut codelist_names: Vec<&String> = version.codelists()?.keys().collect();
    codelist_names.sort();
    let mut codelists = Map::new();
    for name in codelist_names {
        let codelist = &version.codelists()?[name];
        let rows: Vec<Value> = codelist
            .iter()
            .map(|row| {
                Value::Object(
                    row.iter()
                        .map(|(column, value)| (column.to_string(), Value::String(value.to_string())))
                        .collect(),
                )
            })
            .collect();
        codelists.insert(
            name.clone(),
            json!({ LANGUAGE: { "fieldnames": codelist.fieldnames(), "rows": rows } }),
        );
    }

    let mut doc_names: Vec<&String> = version.docs()?.keys().collect();
    doc_names.sort();
    let mut docs = Map::new();
    for name in doc_names {
        let Some(text) = version.docs()?[name].as_text().filter(|_| name.ends_with(".md")) else {
            warn!("Not including {} (no .md extension)", name);
            continue;
        };
        docs.insert(name.clone(), json!({ LANGUAGE: text }));
    }

    Ok(json!({
        "id": version.id,
        "date": version.date.map(|date| date.to_string()),
        "version": version.version,
        "base_url": version.base_url,
        "download_url": version.download_url,
        "publisher": {
            "name": version.repository_user().ok(),
            "url": version.repository_user_page().ok(),
        },
        "metadata": version.metadata()?,
        "schemas": schemas,
        "codelists": codelists,
        "docs": docs,
        "readme": { LANGUAGE: version.remote_or(README, "")? },
    }))
}
