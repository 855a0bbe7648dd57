//! The registry of extension versions, and filtering over it

use crate::error::{Error, Result};
use crate::extension_version::{ExtensionInfo, ExtensionVersion, VersionRow};
use crate::fetch::{fetch_text, has_scheme, Fetch};
use crate::parser::parse_records;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// The version name that is always the latest, if present
const MASTER: &str = "master";

/// Return the latest of several versions of the same extension
///
/// A single version is the latest. Otherwise, the `master` version is the
/// latest; otherwise, the most recently dated version.
pub fn get_latest_version<'a, I>(versions: I) -> Result<&'a ExtensionVersion>
where
    I: IntoIterator<Item = &'a ExtensionVersion>,
{
    let versions: Vec<&ExtensionVersion> = versions.into_iter().collect();
    let id = versions.first().map(|v| v.id.clone()).unwrap_or_default();

    if let [only] = versions.as_slice() {
        return Ok(*only);
    }
    if let Some(master) = versions.iter().find(|v| v.version == MASTER) {
        return Ok(*master);
    }

    // Ties go to the first listed
    let mut latest: Option<(&ExtensionVersion, NaiveDate)> = None;
    for &version in &versions {
        if let Some(date) = version.date {
            if latest.map_or(true, |(_, best)| date > best) {
                latest = Some((version, date));
            }
        }
    }
    latest
        .map(|(version, _)| version)
        .ok_or(Error::UnknownLatestVersion(id))
}

/// Criteria for selecting extension versions. Unset criteria match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionFilter {
    pub id: Option<String>,
    pub version: Option<String>,
    pub category: Option<String>,
    pub core: Option<bool>,
    pub date: Option<NaiveDate>,
}

impl VersionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn core(mut self, core: bool) -> Self {
        self.core = Some(core);
        self
    }

    pub fn date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Whether the criteria need the extensions manifest
    fn uses_extension_info(&self) -> bool {
        self.category.is_some() || self.core.is_some()
    }

    fn matches(&self, version: &ExtensionVersion) -> bool {
        let info = version.info();
        self.id.as_ref().map_or(true, |id| *id == version.id)
            && self.version.as_ref().map_or(true, |v| *v == version.version)
            && self.date.map_or(true, |date| version.date == Some(date))
            && self.category.as_ref().map_or(true, |category| {
                info.is_some_and(|info| info.category == *category)
            })
            && self.core.map_or(true, |core| info.is_some_and(|info| info.core == core))
    }
}

impl fmt::Display for VersionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(id) = &self.id {
            parts.push(format!("id={id:?}"));
        }
        if let Some(version) = &self.version {
            parts.push(format!("version={version:?}"));
        }
        if let Some(category) = &self.category {
            parts.push(format!("category={category:?}"));
        }
        if let Some(core) = self.core {
            parts.push(format!("core={core}"));
        }
        if let Some(date) = self.date {
            parts.push(format!("date={date}"));
        }
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// All known versions of all known extensions, in manifest order
#[derive(Debug)]
pub struct ExtensionRegistry {
    versions: Vec<Arc<ExtensionVersion>>,
    has_extension_info: bool,
}

impl ExtensionRegistry {
    /// Build a registry from the extension versions manifest and, optionally,
    /// the extensions manifest.
    ///
    /// Each argument is either CSV text or a URL (`file://` URLs are read from
    /// the filesystem). Without the extensions manifest, versions have no
    /// category or core.
    pub fn new(
        extension_versions: &str,
        extensions: Option<&str>,
        fetcher: Arc<dyn Fetch>,
    ) -> Result<Self> {
        let mut infos: HashMap<String, ExtensionInfo> = HashMap::new();
        if let Some(data) = extensions {
            for info in ExtensionInfo::parse_manifest(&resolve(data, fetcher.as_ref())?)? {
                infos.insert(info.id.clone(), info);
            }
        }

        let rows: Vec<VersionRow> = parse_records(
            &resolve(extension_versions, fetcher.as_ref())?,
            "extension_versions.csv",
        )?;

        let versions: Vec<Arc<ExtensionVersion>> = rows
            .into_iter()
            .map(|row| {
                let mut version = ExtensionVersion::new(row, fetcher.clone());
                if let Some(info) = infos.get(&version.id) {
                    version.update(info);
                }
                Arc::new(version)
            })
            .collect();

        debug!("registry has {} extension versions", versions.len());
        Ok(Self {
            versions,
            has_extension_info: extensions.is_some(),
        })
    }

    /// The versions that match the filter
    ///
    /// Fails with [`Error::MissingExtensionMetadata`] if the filter uses
    /// category or core and the registry has no extensions manifest.
    pub fn filter(&self, filter: &VersionFilter) -> Result<Vec<Arc<ExtensionVersion>>> {
        self.check(filter)?;
        Ok(self
            .versions
            .iter()
            .filter(|version| filter.matches(version))
            .cloned()
            .collect())
    }

    /// The first version that matches the filter
    ///
    /// Fails with [`Error::DoesNotExist`] if none matches.
    pub fn get(&self, filter: &VersionFilter) -> Result<Arc<ExtensionVersion>> {
        self.check(filter)?;
        self.versions
            .iter()
            .find(|version| filter.matches(version))
            .cloned()
            .ok_or_else(|| Error::DoesNotExist(filter.to_string()))
    }

    /// The latest version of an extension
    pub fn latest(&self, id: &str) -> Result<Arc<ExtensionVersion>> {
        let versions = self.filter(&VersionFilter::new().id(id))?;
        if versions.is_empty() {
            return Err(Error::DoesNotExist(VersionFilter::new().id(id).to_string()));
        }
        let latest = get_latest_version(versions.iter().map(Arc::as_ref))?;
        Ok(versions
            .iter()
            .find(|version| std::ptr::eq(version.as_ref(), latest))
            .cloned()
            .unwrap_or_else(|| versions[0].clone()))
    }

    /// The distinct extension ids, in manifest order
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for version in &self.versions {
            if !ids.contains(&version.id.as_str()) {
                ids.push(&version.id);
            }
        }
        ids
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<ExtensionVersion>> {
        self.versions.iter()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    fn check(&self, filter: &VersionFilter) -> Result<()> {
        if filter.uses_extension_info() && !self.has_extension_info {
            return Err(Error::MissingExtensionMetadata);
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a ExtensionRegistry {
    type Item = &'a Arc<ExtensionVersion>;
    type IntoIter = std::slice::Iter<'a, Arc<ExtensionVersion>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Read a manifest that is either a URL or literal CSV text
fn resolve(data_or_url: &str, fetcher: &dyn Fetch) -> Result<String> {
    if has_scheme(data_or_url) {
        fetch_text(fetcher, data_or_url)
    } else {
        Ok(data_or_url.to_string())
    }
}
