//! A version of an extension, and lazy access to its files

use crate::archive::{self, FileContent, FileMap};
use crate::codelist::Codelist;
use crate::error::{Error, Result};
use crate::fetch::{fetch_text, has_scheme, Fetch};
use crate::parser::parse_rows;
use chrono::NaiveDate;
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub const RECORD_PACKAGE_SCHEMA: &str = "record-package-schema.json";
pub const RELEASE_PACKAGE_SCHEMA: &str = "release-package-schema.json";
pub const RELEASE_SCHEMA: &str = "release-schema.json";
pub const EXTENSION_JSON: &str = "extension.json";

/// The schema files an extension can patch
pub const SCHEMAS: [&str; 3] = [RECORD_PACKAGE_SCHEMA, RELEASE_PACKAGE_SCHEMA, RELEASE_SCHEMA];

/// Placeholder for the file name in a URL pattern
const FIELD: &str = "{{ file }}";

const CODELISTS_DIR: &str = "codelists/";
const DOCS_DIR: &str = "docs/";

/// Compatibility assumed when extension.json doesn't declare it
const DEFAULT_COMPATIBILITY: &str = "1.1";

/// A mapping from language code to text
pub type LanguageMap = IndexMap<String, String>;

/// A row of the extension versions manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRow {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Date")]
    pub date: Option<NaiveDate>,
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Base URL")]
    pub base_url: Option<String>,
    #[serde(rename = "Download URL")]
    pub download_url: Option<String>,
}

/// A row of the extensions manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionInfo {
    pub id: String,
    pub category: String,
    pub core: bool,
}

#[derive(Deserialize)]
struct ExtensionRow {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Category")]
    category: Option<String>,
    #[serde(rename = "Core")]
    core: Option<String>,
}

impl From<ExtensionRow> for ExtensionInfo {
    fn from(row: ExtensionRow) -> Self {
        Self {
            id: row.id,
            category: row.category.unwrap_or_default(),
            core: row.core.as_deref() == Some("true"),
        }
    }
}

impl ExtensionInfo {
    /// Parse the rows of an extensions manifest
    pub fn parse_manifest(content: &str) -> Result<Vec<Self>> {
        let rows: Vec<ExtensionRow> = crate::parser::parse_records(content, "extensions.csv")?;
        Ok(rows.into_iter().map(Self::from).collect())
    }
}

/// The parsed contents of extension.json, with required fields defaulted
///
/// Serializes with the keys in document order. Defaulted fields that the
/// document lacks come last.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub name: LanguageMap,
    pub description: LanguageMap,
    pub documentation_url: LanguageMap,
    pub compatibility: Vec<String>,
    pub schemas: Option<Vec<String>>,
    pub codelists: Option<Vec<String>>,
    /// Any other fields, in document order
    pub other: Map<String, Value>,
    key_order: Vec<String>,
}

impl Metadata {
    /// Parse extension.json
    ///
    /// `name`, `description` and `documentationUrl` become language maps: a
    /// bare string is taken to be English, and a missing field is empty.
    /// A missing or bare-string `compatibility` becomes `["1.1"]`.
    pub fn parse(content: &str) -> Result<Self> {
        let Value::Object(mut map) = serde_json::from_str(content)? else {
            return Err(Error::InvalidMetadata("extension.json is not an object".into()));
        };
        let key_order = map.keys().cloned().collect();

        let name = language_map(map.shift_remove("name"));
        let description = language_map(map.shift_remove("description"));
        let documentation_url = language_map(map.shift_remove("documentationUrl"));
        let compatibility = match map.shift_remove("compatibility") {
            Some(Value::Array(values)) => strings(values),
            _ => vec![DEFAULT_COMPATIBILITY.to_string()],
        };
        let schemas = string_list(map.shift_remove("schemas"), "schemas")?;
        let codelists = string_list(map.shift_remove("codelists"), "codelists")?;

        Ok(Self {
            name,
            description,
            documentation_url,
            compatibility,
            schemas,
            codelists,
            other: map,
            key_order,
        })
    }

    /// The normalized fields, keyed as in extension.json
    fn known_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("name".into(), language_value(&self.name));
        fields.insert("description".into(), language_value(&self.description));
        fields.insert("documentationUrl".into(), language_value(&self.documentation_url));
        fields.insert("compatibility".into(), string_values(&self.compatibility));
        if let Some(schemas) = &self.schemas {
            fields.insert("schemas".into(), string_values(schemas));
        }
        if let Some(codelists) = &self.codelists {
            fields.insert("codelists".into(), string_values(codelists));
        }
        fields
    }

    /// The extension's name in a language, if translated
    pub fn name_in(&self, language: &str) -> Option<&str> {
        self.name.get(language).map(String::as_str)
    }
}

impl Serialize for Metadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut known = self.known_fields();
        let mut map = serializer.serialize_map(None)?;
        for key in &self.key_order {
            if let Some(value) = known.shift_remove(key) {
                map.serialize_entry(key, &value)?;
            } else if let Some(value) = self.other.get(key) {
                map.serialize_entry(key, value)?;
            }
        }
        for (key, value) in &known {
            map.serialize_entry(key, value)?;
        }
        for (key, value) in &self.other {
            if !self.key_order.contains(key) {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}

fn language_value(map: &LanguageMap) -> Value {
    Value::Object(
        map.iter()
            .map(|(language, text)| (language.clone(), Value::String(text.clone())))
            .collect(),
    )
}

fn string_values(values: &[String]) -> Value {
    Value::Array(values.iter().cloned().map(Value::String).collect())
}

fn language_map(value: Option<Value>) -> LanguageMap {
    match value {
        None | Some(Value::Null) => LanguageMap::new(),
        Some(Value::Object(map)) => map
            .into_iter()
            .map(|(language, text)| match text {
                Value::String(s) => (language, s),
                other => (language, other.to_string()),
            })
            .collect(),
        Some(Value::String(s)) => LanguageMap::from([("en".to_string(), s)]),
        Some(other) => LanguageMap::from([("en".to_string(), other.to_string())]),
    }
}

fn strings(values: Vec<Value>) -> Vec<String> {
    values
        .into_iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s),
            _ => None,
        })
        .collect()
}

fn string_list(value: Option<Value>, field: &str) -> Result<Option<Vec<String>>> {
    match value {
        None => Ok(None),
        Some(Value::Array(values)) => Ok(Some(strings(values))),
        Some(_) => Err(Error::InvalidMetadata(format!("{field} is not an array"))),
    }
}

/// Which names to load, and whether a missing one is an error
struct Resolution {
    names: Vec<String>,
    strict: bool,
}

/// One published version of one extension.
///
/// Derived data (files, metadata, schemas, codelists, docs) is computed on
/// first access and cached for the lifetime of the instance.
pub struct ExtensionVersion {
    pub id: String,
    pub date: Option<NaiveDate>,
    pub version: String,
    /// A directory from which individual files can be fetched
    pub base_url: Option<String>,
    /// A ZIP archive of all files
    pub download_url: Option<String>,
    /// The locator this version was built from, if not a manifest row
    pub input_url: Option<String>,
    url_pattern: Option<String>,
    file_urls: IndexMap<String, String>,
    directory: Option<PathBuf>,
    info: Option<ExtensionInfo>,
    fetcher: Arc<dyn Fetch>,
    files: OnceCell<FileMap>,
    fetched: Mutex<FileMap>,
    metadata: OnceCell<Metadata>,
    schemas: OnceCell<IndexMap<String, Value>>,
    codelists: OnceCell<IndexMap<String, Codelist>>,
    docs: OnceCell<FileMap>,
}

impl ExtensionVersion {
    /// Create a version from a row of the extension versions manifest
    pub fn new(row: VersionRow, fetcher: Arc<dyn Fetch>) -> Self {
        Self {
            id: row.id,
            date: row.date,
            version: row.version,
            base_url: row.base_url.filter(|url| !url.is_empty()),
            download_url: row.download_url.filter(|url| !url.is_empty()),
            input_url: None,
            url_pattern: None,
            file_urls: IndexMap::new(),
            directory: None,
            info: None,
            fetcher,
            files: OnceCell::new(),
            fetched: Mutex::default(),
            metadata: OnceCell::new(),
            schemas: OnceCell::new(),
            codelists: OnceCell::new(),
            docs: OnceCell::new(),
        }
    }

    /// Create a version from a locator
    ///
    /// - `…/extension.json` → the base URL is its directory
    /// - `…/` → a base URL
    /// - any other URL containing `extension.json` or `release-schema.json`
    ///   → a pattern in which the file name is substituted
    /// - any other URL whose path ends in `.json` → the release schema patch
    /// - an absolute local path → a local directory
    /// - anything else → a download URL
    pub fn from_url(url: &str, fetcher: Arc<dyn Fetch>) -> Self {
        let mut version = Self::new(VersionRow::default(), fetcher);
        version.input_url = Some(url.to_string());

        if !has_scheme(url) && Path::new(url).is_absolute() {
            version.directory = Some(PathBuf::from(url));
        } else if let Some(base) = url.strip_suffix(EXTENSION_JSON).filter(|b| b.ends_with('/')) {
            version.base_url = Some(base.to_string());
        } else if url.ends_with('/') {
            version.base_url = Some(url.to_string());
        } else if url.contains(EXTENSION_JSON) {
            version.url_pattern = Some(url.replace(EXTENSION_JSON, FIELD));
        } else if url.contains(RELEASE_SCHEMA) {
            version.url_pattern = Some(url.replace(RELEASE_SCHEMA, FIELD));
        } else if url_path(url).ends_with(".json") {
            version.file_urls.insert(RELEASE_SCHEMA.to_string(), url.to_string());
        } else {
            version.download_url = Some(url.to_string());
        }

        version
    }

    /// Create a version from a local directory
    pub fn from_directory<P: Into<PathBuf>>(path: P, fetcher: Arc<dyn Fetch>) -> Self {
        let mut version = Self::new(VersionRow::default(), fetcher);
        let path = path.into();
        version.input_url = Some(path.display().to_string());
        version.directory = Some(path);
        version
    }

    /// Merge in the extension's row from the extensions manifest
    pub fn update(&mut self, info: &ExtensionInfo) {
        self.info = Some(info.clone());
    }

    /// The extension's row from the extensions manifest, if merged in
    pub fn info(&self) -> Option<&ExtensionInfo> {
        self.info.as_ref()
    }

    /// The extension's category
    ///
    /// Fails with [`Error::MissingExtensionMetadata`] if no extensions
    /// manifest was merged in.
    pub fn category(&self) -> Result<&str> {
        self.info
            .as_ref()
            .map(|info| info.category.as_str())
            .ok_or(Error::MissingExtensionMetadata)
    }

    /// Whether the extension is a core extension
    ///
    /// Fails with [`Error::MissingExtensionMetadata`] if no extensions
    /// manifest was merged in.
    pub fn core(&self) -> Result<bool> {
        self.info
            .as_ref()
            .map(|info| info.core)
            .ok_or(Error::MissingExtensionMetadata)
    }

    /// Whether all files come at once, from an archive or a directory
    fn is_bulk(&self) -> bool {
        self.download_url.is_some() || self.directory.is_some()
    }

    /// The unparsed contents of all files
    ///
    /// Downloads and unpacks the archive (or reads the directory) once. Without
    /// a download URL or directory, returns an empty set: files are then
    /// fetched individually by [`remote`](Self::remote).
    pub fn files(&self) -> Result<&FileMap> {
        self.files.get_or_try_init(|| {
            if let Some(url) = &self.download_url {
                debug!("downloading {}", url);
                archive::unpack(&self.fetcher.fetch(url)?)
            } else if let Some(path) = &self.directory {
                archive::read_directory(path)
            } else {
                Ok(FileMap::new())
            }
        })
    }

    /// The text of a file within the extension
    ///
    /// With a download URL or directory, fails with [`Error::FileNotFound`]
    /// if the file isn't among the extension's files. Otherwise, fetches the
    /// file individually, propagating any transport error.
    pub fn remote(&self, name: &str) -> Result<String> {
        if let Some(content) = self.files()?.get(name) {
            return text(name, content);
        }
        if let Some(content) = self.fetched.lock().get(name) {
            return text(name, content);
        }
        if self.is_bulk() {
            return Err(Error::FileNotFound {
                name: name.to_string(),
            });
        }

        let url = self.file_url(name)?;
        let content = fetch_text(self.fetcher.as_ref(), &url)?;
        self.fetched
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| FileContent::Text(content.clone()));
        Ok(content)
    }

    /// Like [`remote`](Self::remote), but returns `default` if the file is absent
    ///
    /// An archive that can't be downloaded is an error, not an absent file.
    pub fn remote_or(&self, name: &str, default: &str) -> Result<String> {
        self.files()?;
        match self.remote(name) {
            Err(e) if e.is_absent() => Ok(default.to_string()),
            result => result,
        }
    }

    fn file_url(&self, name: &str) -> Result<String> {
        if let Some(url) = self.file_urls.get(name) {
            Ok(url.clone())
        } else if let Some(pattern) = &self.url_pattern {
            Ok(pattern.replace(FIELD, name))
        } else if let Some(base_url) = &self.base_url {
            Ok(format!("{base_url}{name}"))
        } else {
            Err(Error::FileNotFound {
                name: name.to_string(),
            })
        }
    }

    /// The parsed contents of extension.json
    pub fn metadata(&self) -> Result<&Metadata> {
        self.metadata.get_or_try_init(|| Metadata::parse(&self.remote(EXTENSION_JSON)?))
    }

    /// The parsed contents of the extension's schema files
    ///
    /// Loads the schemas listed in extension.json (all must exist), else the
    /// standard schema files in the archive, else any standard schema file
    /// that can be fetched.
    pub fn schemas(&self) -> Result<&IndexMap<String, Value>> {
        self.schemas.get_or_try_init(|| {
            let resolution = self.resolve(
                self.metadata()?.schemas.as_deref(),
                |files| {
                    files
                        .keys()
                        .filter(|name| SCHEMAS.contains(&name.as_str()))
                        .cloned()
                        .collect()
                },
                &SCHEMAS,
            )?;
            self.load_each(resolution, |name| {
                Ok(serde_json::from_str(&self.remote(name)?)?)
            })
        })
    }

    /// The parsed contents of the extension's codelist files, keyed by file name
    ///
    /// Loads the codelists listed in extension.json (all must exist), else
    /// the codelists in the archive, else none.
    pub fn codelists(&self) -> Result<&IndexMap<String, Codelist>> {
        self.codelists.get_or_try_init(|| {
            let resolution = self.resolve(
                self.metadata()?.codelists.as_deref(),
                |files| {
                    files
                        .keys()
                        .filter_map(|name| name.strip_prefix(CODELISTS_DIR))
                        .filter(|name| !name.is_empty())
                        .map(str::to_string)
                        .collect()
                },
                &[],
            )?;
            self.load_each(resolution, |name| {
                let path = format!("{CODELISTS_DIR}{name}");
                let mut codelist = Codelist::new(name);
                codelist.extend(parse_rows(&self.remote(&path)?, name)?, None);
                Ok(codelist)
            })
        })
    }

    /// The unparsed contents of the files in the docs directory
    pub fn docs(&self) -> Result<&FileMap> {
        self.docs.get_or_try_init(|| Ok(archive::subtree(self.files()?, DOCS_DIR)))
    }

    fn resolve<F>(&self, declared: Option<&[String]>, archived: F, defaults: &[&str]) -> Result<Resolution>
    where
        F: FnOnce(&FileMap) -> Vec<String>,
    {
        Ok(match declared {
            Some(names) => Resolution {
                names: names.to_vec(),
                strict: true,
            },
            None if self.is_bulk() => Resolution {
                names: archived(self.files()?),
                strict: false,
            },
            None => Resolution {
                names: defaults.iter().map(|name| name.to_string()).collect(),
                strict: false,
            },
        })
    }

    fn load_each<T, F>(&self, resolution: Resolution, load: F) -> Result<IndexMap<String, T>>
    where
        F: Fn(&str) -> Result<T>,
    {
        let mut loaded = IndexMap::new();
        for name in resolution.names {
            match load(&name) {
                Ok(value) => {
                    loaded.insert(name, value);
                }
                Err(e) if !resolution.strict && e.is_absent() => {
                    debug!("{} has no {}: {}", self, name, e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(loaded)
    }
}

fn text(name: &str, content: &FileContent) -> Result<String> {
    match content {
        FileContent::Text(text) => Ok(text.clone()),
        FileContent::Binary(bytes) => String::from_utf8(bytes.clone()).map_err(|_| Error::Utf8 {
            name: name.to_string(),
        }),
    }
}

fn url_path(url: &str) -> String {
    url::Url::parse(url)
        .map(|parsed| parsed.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}

impl fmt::Display for ExtensionVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.input_url, self.version.is_empty()) {
            (Some(url), _) if self.id.is_empty() => write!(f, "{url}"),
            (_, true) => write!(f, "{}", self.id),
            (_, false) => write!(f, "{}=={}", self.id, self.version),
        }
    }
}

impl fmt::Debug for ExtensionVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionVersion")
            .field("id", &self.id)
            .field("date", &self.date)
            .field("version", &self.version)
            .field("base_url", &self.base_url)
            .field("download_url", &self.download_url)
            .field("input_url", &self.input_url)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}
