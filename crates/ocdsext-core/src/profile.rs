//! Building a profile: the standard plus a selection of extensions
//!
//! ```no_run
//! use indexmap::IndexMap;
//! use ocdsext_core::{ExtensionSelection, HttpFetcher, PatchOptions, ProfileBuilder};
//! use std::sync::Arc;
//!
//! let selection = ExtensionSelection::Versions(IndexMap::from([
//!     ("lots".to_string(), "v1.1.4".to_string()),
//!     ("bids".to_string(), "v1.1.4".to_string()),
//! ]));
//! let builder = ProfileBuilder::new("1__1__4", selection, Arc::new(HttpFetcher::new()));
//! let schema = builder.patched_release_schema(None, &PatchOptions::default())?;
//! # Ok::<(), ocdsext_core::Error>(())
//! ```

use crate::archive::{self, FileMap};
use once_cell::sync::OnceCell;
use crate::codelist::{Codelist, CORE};
use crate::codelist_patch::{patch_codelists, CodelistCollector};
use crate::error::{Error, Result};
use crate::extension_version::{
    ExtensionVersion, RECORD_PACKAGE_SCHEMA, RELEASE_PACKAGE_SCHEMA, RELEASE_SCHEMA,
};
use crate::fetch::{has_scheme, Fetch};
use crate::parser::parse_rows;
use crate::registry::{ExtensionRegistry, VersionFilter};
use crate::schema_patch::{merge_patch, release_schema_patch, PatchOptions};
use crate::warning::{Merged, Warning};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;
use url::Url;

pub const DEFAULT_REGISTRY_BASE_URL: &str =
    "https://raw.githubusercontent.com/open-contracting/extension_registry/main/";
pub const DEFAULT_STANDARD_BASE_URL: &str = "https://codeload.github.com/open-contracting/standard/zip/";

/// Tags before this one keep the schema under `standard/schema/`
const SCHEMA_MOVED_TAG: &str = "1__1__5";

/// Where a release package schema refers to the release schema
const RELEASE_PACKAGE_RELEASES: &[&[&str]] = &[&["properties", "releases", "items"]];

/// Where a record package schema refers to the release schema
const RECORD_PACKAGE_RELEASES: &[&[&str]] = &[
    &["definitions", "record", "properties", "compiledRelease"],
    &["definitions", "record", "properties", "releases", "oneOf", "1", "items"],
];

/// The extensions in a profile, in the order their patches apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtensionSelection {
    /// Extension ids and versions, looked up in the registry. A version that
    /// is a URL is used directly.
    Versions(IndexMap<String, String>),
    /// Metadata URLs, base URLs, download URLs or local directories
    Urls(Vec<String>),
}

impl Default for ExtensionSelection {
    fn default() -> Self {
        ExtensionSelection::Versions(IndexMap::new())
    }
}

impl ExtensionSelection {
    /// Parse selectors: all `id==version` (or `id` for `master`), or all locators
    ///
    /// Fails with [`Error::MixedSelection`] if locators and ids are mixed.
    pub fn from_selectors<S: AsRef<str>>(selectors: &[S]) -> Result<Self> {
        let (locators, ids): (Vec<&str>, Vec<&str>) = selectors
            .iter()
            .map(AsRef::as_ref)
            .partition(|selector| is_locator(selector));

        match (locators.first(), ids.first()) {
            (Some(_), Some(id)) => Err(Error::MixedSelection(id.to_string())),
            (Some(_), None) => Ok(ExtensionSelection::Urls(
                locators.into_iter().map(str::to_string).collect(),
            )),
            _ => Ok(ExtensionSelection::Versions(
                ids.into_iter()
                    .map(|selector| {
                        let (id, version) = selector.split_once("==").unwrap_or((selector, "master"));
                        (id.to_string(), version.to_string())
                    })
                    .collect(),
            )),
        }
    }
}

fn is_locator(selector: &str) -> bool {
    has_scheme(selector) || std::path::Path::new(selector).is_absolute()
}

/// Builds the schemas and codelists of a profile
///
/// The standard's files and the selected extension versions are retrieved
/// once, on first use.
pub struct ProfileBuilder {
    standard_tag: String,
    selection: ExtensionSelection,
    registry_base_url: String,
    standard_base_url: Option<String>,
    schema_base_url: Option<String>,
    fetcher: Arc<dyn Fetch>,
    registry: OnceCell<Arc<ExtensionRegistry>>,
    extensions: OnceCell<Vec<Arc<ExtensionVersion>>>,
    standard_files: OnceCell<FileMap>,
}

impl ProfileBuilder {
    /// Create a builder for a tag of the standard, e.g. `1__1__4`
    pub fn new(standard_tag: impl Into<String>, selection: ExtensionSelection, fetcher: Arc<dyn Fetch>) -> Self {
        let standard_tag = standard_tag.into();
        let standard_base_url = (!standard_tag.is_empty())
            .then(|| format!("{DEFAULT_STANDARD_BASE_URL}{standard_tag}"));
        Self {
            standard_tag,
            selection,
            registry_base_url: DEFAULT_REGISTRY_BASE_URL.to_string(),
            standard_base_url,
            schema_base_url: None,
            fetcher,
            registry: OnceCell::new(),
            extensions: OnceCell::new(),
            standard_files: OnceCell::new(),
        }
    }

    /// Read the registry from another location, e.g. a pull request's branch
    pub fn with_registry_base_url(mut self, url: impl Into<String>) -> Self {
        self.registry_base_url = url.into();
        self
    }

    /// Download the standard from another location
    pub fn with_standard_base_url(mut self, url: impl Into<String>) -> Self {
        self.standard_base_url = Some(url.into());
        self
    }

    /// Set the URL at which the profile's schemas will be published
    pub fn with_schema_base_url(mut self, url: impl Into<String>) -> Self {
        self.schema_base_url = Some(url.into());
        self
    }

    /// Use an already built registry
    pub fn with_registry(self, registry: Arc<ExtensionRegistry>) -> Self {
        // The cell is empty until first use, so this can't fail.
        let _ = self.registry.set(registry);
        self
    }

    pub fn standard_tag(&self) -> &str {
        &self.standard_tag
    }

    /// The registry, read from `extension_versions.csv` at the registry base URL
    pub fn registry(&self) -> Result<&Arc<ExtensionRegistry>> {
        self.registry.get_or_try_init(|| {
            let url = format!("{}extension_versions.csv", self.registry_base_url);
            debug!("reading registry from {}", url);
            Ok(Arc::new(ExtensionRegistry::new(&url, None, self.fetcher.clone())?))
        })
    }

    /// The selected extension versions, in order
    pub fn extensions(&self) -> Result<&[Arc<ExtensionVersion>]> {
        self.extensions.get_or_try_init(|| match &self.selection {
            ExtensionSelection::Versions(versions) => versions
                .iter()
                .map(|(id, version)| {
                    if has_scheme(version) {
                        Ok(Arc::new(ExtensionVersion::from_url(version, self.fetcher.clone())))
                    } else {
                        self.registry()?
                            .get(&VersionFilter::new().id(id).version(version))
                    }
                })
                .collect(),
            ExtensionSelection::Urls(urls) => Ok(urls
                .iter()
                .filter(|url| !url.is_empty())
                .map(|url| Arc::new(ExtensionVersion::from_url(url, self.fetcher.clone())))
                .collect()),
        })
        .map(Vec::as_slice)
    }

    /// The merged release schema patch of the extensions
    pub fn release_schema_patch(&self, options: &PatchOptions) -> Result<Merged<Value>> {
        release_schema_patch(self.extensions()?, options)
    }

    /// The release schema, with the extensions' patches applied
    ///
    /// Uses the standard's release schema unless one is given. With a schema
    /// base URL, the `id` is rewritten.
    pub fn patched_release_schema(&self, schema: Option<Value>, options: &PatchOptions) -> Result<Merged<Value>> {
        let mut schema = match schema {
            Some(schema) => schema,
            None => self.standard_schema(RELEASE_SCHEMA)?,
        };

        let patch = self.release_schema_patch(options)?;
        let (patch, warnings) = patch.into_parts();
        merge_patch(&mut schema, patch);

        if let Some(url) = self.schema_url(RELEASE_SCHEMA)? {
            set(&mut schema, &["id"], Value::String(url));
        }

        Ok(Merged {
            value: schema,
            warnings,
        })
    }

    /// The release package schema
    ///
    /// With a schema base URL, the `id` is rewritten, and the releases either
    /// reference the published release schema or, if `embed`, embed the
    /// dereferenced patched release schema.
    pub fn release_package_schema(
        &self,
        schema: Option<Value>,
        embed: bool,
        options: &PatchOptions,
    ) -> Result<Merged<Value>> {
        let schema = match schema {
            Some(schema) => schema,
            None => self.standard_schema(RELEASE_PACKAGE_SCHEMA)?,
        };
        self.package_schema(
            schema,
            RELEASE_PACKAGE_SCHEMA,
            RELEASE_PACKAGE_RELEASES,
            embed,
            options,
        )
    }

    /// The record package schema, adjusted like the release package schema
    pub fn record_package_schema(
        &self,
        schema: Option<Value>,
        embed: bool,
        options: &PatchOptions,
    ) -> Result<Merged<Value>> {
        let schema = match schema {
            Some(schema) => schema,
            None => self.standard_schema(RECORD_PACKAGE_SCHEMA)?,
        };
        self.package_schema(
            schema,
            RECORD_PACKAGE_SCHEMA,
            RECORD_PACKAGE_RELEASES,
            embed,
            options,
        )
    }

    fn package_schema(
        &self,
        mut schema: Value,
        name: &str,
        release_paths: &[&[&str]],
        embed: bool,
        options: &PatchOptions,
    ) -> Result<Merged<Value>> {
        let Some(url) = self.schema_url(name)? else {
            return Ok(Merged::new(schema));
        };
        set(&mut schema, &["id"], Value::String(url));

        let mut warnings = Vec::new();
        if embed {
            let patched = self.patched_release_schema(None, options)?;
            warnings = patched.warnings;
            let release = dereference(&patched.value);
            for path in release_paths {
                set(&mut schema, path, release.clone());
            }
        } else if let Some(release_url) = self.schema_url(RELEASE_SCHEMA)? {
            for path in release_paths {
                let mut reference = path.to_vec();
                reference.push("$ref");
                set(&mut schema, &reference, Value::String(release_url.clone()));
            }
        }

        Ok(Merged {
            value: schema,
            warnings,
        })
    }

    /// The standard's codelists, keyed by file name
    pub fn standard_codelists(&self) -> Result<IndexMap<String, Codelist>> {
        let mut codelists = IndexMap::new();
        for (path, content) in self.standard_files()? {
            let mut segments = path.split('/');
            let name = segments.next_back().unwrap_or_default();
            if name.is_empty() || !segments.any(|segment| segment == "codelists") {
                continue;
            }
            let text = content.as_text().ok_or_else(|| Error::Utf8 { name: path.clone() })?;
            let mut codelist = Codelist::new(name);
            codelist.extend(parse_rows(text, name)?, Some(CORE));
            codelists.insert(name.to_string(), codelist);
        }
        Ok(codelists)
    }

    /// The extensions' codelists, keyed by file name
    ///
    /// Reads the codelists listed in each extension's metadata. See
    /// [`CodelistCollector`] for how they merge. An extension whose metadata
    /// can't be retrieved or decoded is skipped with a warning, as is a listed
    /// codelist that can be retrieved but not decoded. A listed codelist that
    /// is missing is an error.
    pub fn extension_codelists(&self) -> Result<Merged<IndexMap<String, Codelist>>> {
        let mut collector = CodelistCollector::new();
        let mut warnings = Vec::new();

        for extension in self.extensions()? {
            let metadata = match extension.metadata() {
                Ok(metadata) => metadata,
                Err(e) if e.is_transport() => {
                    warnings.push(
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
            let extension_name = metadata
                .name_in("en")
                .map(str::to_string)
                .unwrap_or_else(|| extension.to_string());

            for name in metadata.codelists.iter().flatten() {
                let added = extension
                    .remote(&format!("codelists/{name}"))
                    .and_then(|content| collector.add(&extension_name, name, &content));
                match added {
                    Ok(()) => {}
                    Err(e) if e.is_transport() && !e.is_absent() => {
                        warnings.push(
                            Warning::Codelist {
                                extension: extension.to_string(),
                                codelist: name.clone(),
                                error: e.to_string(),
                            }
                            .emit(),
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let mut merged = collector.finish();
        warnings.append(&mut merged.warnings);
        Ok(Merged {
            value: merged.value,
            warnings,
        })
    }

    /// The standard's codelists with the extensions' codelists applied, plus
    /// the extensions' new codelists
    pub fn patched_codelists(&self) -> Result<Merged<IndexMap<String, Codelist>>> {
        let standard = self.standard_codelists()?;
        let (extension, warnings) = self.extension_codelists()?.into_parts();
        Ok(Merged {
            value: patch_codelists(standard, extension.into_values())?,
            warnings,
        })
    }

    /// The text of a file in the standard's schema directory
    pub fn standard_file_contents(&self, name: &str) -> Result<String> {
        self.standard_files()?
            .get(name)
            .and_then(|content| content.as_text())
            .map(str::to_string)
            .ok_or_else(|| Error::StandardFileNotFound(name.to_string()))
    }

    /// The files in the standard's schema directory, downloaded once
    fn standard_files(&self) -> Result<&FileMap> {
        self.standard_files.get_or_try_init(|| {
            let url = self
                .standard_base_url
                .as_deref()
                .ok_or_else(|| Error::StandardFileNotFound(RELEASE_SCHEMA.to_string()))?;
            debug!("downloading standard from {}", url);
            let files = archive::unpack(&self.fetcher.fetch(url)?)?;

            let prefix = if self.standard_tag.as_str() < SCHEMA_MOVED_TAG {
                "standard/schema/"
            } else {
                "schema/"
            };
            Ok(archive::subtree(&files, prefix))
        })
    }

    fn standard_schema(&self, name: &str) -> Result<Value> {
        Ok(serde_json::from_str(&self.standard_file_contents(name)?)?)
    }

    fn schema_url(&self, name: &str) -> Result<Option<String>> {
        let Some(base) = &self.schema_base_url else {
            return Ok(None);
        };
        let joined = Url::parse(base)
            .and_then(|base| base.join(name))
            .map_err(|source| Error::InvalidUrl {
                url: base.clone(),
                source,
            })?;
        Ok(Some(joined.to_string()))
    }
}

impl std::fmt::Debug for ProfileBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileBuilder")
            .field("standard_tag", &self.standard_tag)
            .field("selection", &self.selection)
            .field("registry_base_url", &self.registry_base_url)
            .field("standard_base_url", &self.standard_base_url)
            .field("schema_base_url", &self.schema_base_url)
            .finish_non_exhaustive()
    }
}

/// Set the value at a path of object keys or array indices, creating
/// objects along the way. A missing array index sets nothing.
fn set(target: &mut Value, path: &[&str], value: Value) {
    let Some((first, rest)) = path.split_first() else {
        *target = value;
        return;
    };
    match target {
        Value::Array(items) => {
            if let Some(item) = first.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                set(item, rest, value);
            }
        }
        _ => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            if let Value::Object(map) = target {
                set(map.entry(first.to_string()).or_insert(Value::Null), rest, value);
            }
        }
    }
}

/// Replace local `$ref`s (`#/…`) with the values they point to
///
/// A reference to one of its own ancestors is left as a `$ref`, as are
/// references to other documents and unresolvable references.
pub fn dereference(schema: &Value) -> Value {
    resolve_refs(schema, schema, &mut Vec::new())
}

fn resolve_refs(value: &Value, root: &Value, stack: &mut Vec<String>) -> Value {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(reference)) = map.get("$ref") {
                if let Some(pointer) = reference.strip_prefix('#') {
                    if !stack.contains(reference) {
                        if let Some(target) = root.pointer(pointer) {
                            stack.push(reference.clone());
                            let resolved = resolve_refs(target, root, stack);
                            stack.pop();
                            return resolved;
                        }
                    }
                }
            }
            Value::Object(
                map.iter()
                    .map(|(key, child)| (key.clone(), resolve_refs(child, root, stack)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(|item| resolve_refs(item, root, stack)).collect()),
        other => other.clone(),
    }
}
