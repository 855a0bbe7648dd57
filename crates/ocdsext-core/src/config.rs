//! Profile configuration files, and exporting a profile's files

use crate::error::{Error, Result};
use crate::extension_version::{RECORD_PACKAGE_SCHEMA, RELEASE_PACKAGE_SCHEMA, RELEASE_SCHEMA};
use crate::fetch::Fetch;
use crate::profile::{ExtensionSelection, ProfileBuilder};
use crate::schema_patch::PatchOptions;
use crate::util::json_dump;
use crate::warning::Warning;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub const RELEASE_SCHEMA_PATCH: &str = "release-schema-patch.json";

/// A profile's definition, stored as JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// The tag of the standard, e.g. `1__1__4`
    pub standard_tag: String,
    /// The extensions, as ids and versions or as URLs
    pub extensions: ExtensionSelection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_base_url: Option<String>,
    /// Where the profile's schemas will be published
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_base_url: Option<String>,
    /// Annotate definitions and fields with their extension's name under this property
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_field: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    /// Embed the release schema in the package schemas instead of referencing it
    #[serde(default)]
    pub embed: bool,
    /// Remove deprecated codes from the patched codelists
    #[serde(default)]
    pub remove_deprecated: bool,
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            standard_tag: "1__1__5".to_string(),
            extensions: ExtensionSelection::default(),
            registry_base_url: None,
            standard_base_url: None,
            schema_base_url: None,
            extension_field: None,
            language: default_language(),
            embed: false,
            remove_deprecated: false,
        }
    }
}

impl ProfileConfig {
    /// Load a configuration from JSON
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| Error::FileRead {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(Error::Json)
    }

    /// Save the configuration to JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = json_dump(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn patch_options(&self) -> PatchOptions {
        PatchOptions {
            extension_field: self.extension_field.clone(),
            language: self.language.clone(),
        }
    }

    /// Create a profile builder for this configuration
    pub fn builder(&self, fetcher: Arc<dyn Fetch>) -> ProfileBuilder {
        let mut builder = ProfileBuilder::new(&self.standard_tag, self.extensions.clone(), fetcher);
        if let Some(url) = &self.registry_base_url {
            builder = builder.with_registry_base_url(url);
        }
        if let Some(url) = &self.standard_base_url {
            builder = builder.with_standard_base_url(url);
        }
        if let Some(url) = &self.schema_base_url {
            builder = builder.with_schema_base_url(url);
        }
        builder
    }

    /// Build the profile, and write its schemas and codelists to a directory
    ///
    /// Writes the patched release schema, the package schemas, the merged
    /// release schema patch and a `codelists/` directory of CSV files.
    pub fn export<P: AsRef<Path>>(&self, fetcher: Arc<dyn Fetch>, output_dir: P) -> Result<ExportResult> {
        let output_dir = output_dir.as_ref();
        let builder = self.builder(fetcher);
        let options = self.patch_options();
        let mut result = ExportResult::default();

        let patch = builder.release_schema_patch(&options)?;
        result.warnings.extend(patch.warnings);
        result.write(&output_dir.join(RELEASE_SCHEMA_PATCH), &json_dump(&patch.value)?)?;

        // The warnings of these repeat those of the patch.
        let schema = builder.patched_release_schema(None, &options)?.value;
        result.write(&output_dir.join(RELEASE_SCHEMA), &json_dump(&schema)?)?;
        let schema = builder.release_package_schema(None, self.embed, &options)?.value;
        result.write(&output_dir.join(RELEASE_PACKAGE_SCHEMA), &json_dump(&schema)?)?;
        let schema = builder.record_package_schema(None, self.embed, &options)?.value;
        result.write(&output_dir.join(RECORD_PACKAGE_SCHEMA), &json_dump(&schema)?)?;

        let codelists = builder.patched_codelists()?;
        result.warnings.extend(codelists.warnings);
        let codelists_dir = output_dir.join("codelists");
        fs::create_dir_all(&codelists_dir)?;
        for (name, mut codelist) in codelists.value {
            if self.remove_deprecated {
                codelist.remove_deprecated_codes();
            }
            result.write(&codelists_dir.join(&name), &codelist.to_csv()?)?;
        }

        info!("wrote {} files to {}", result.files_written.len(), output_dir.display());
        Ok(result)
    }
}

/// The outcome of exporting a profile
#[derive(Debug, Clone, Default)]
pub struct ExportResult {
    /// Files written, in order
    pub files_written: Vec<PathBuf>,
    /// Problems skipped over while building the profile
    pub warnings: Vec<Warning>,
}

impl ExportResult {
    fn write(&mut self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        self.files_written.push(path.to_path_buf());
        Ok(())
    }
}
