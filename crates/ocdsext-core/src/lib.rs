//! ocdsext-core: Core library for OCDS extensions and profiles
//!
//! This library provides functionality to:
//! - Read the extension registry and filter versions of extensions
//! - Retrieve an extension version's metadata, schemas, codelists and docs
//! - Merge extensions' release schema patches
//! - Merge extensions' codelists with each other and with the standard's
//! - Build and export a profile: the standard plus a selection of extensions

pub mod archive;
pub mod codelist;
pub mod codelist_patch;
pub mod config;
pub mod data_file;
pub mod error;
pub mod extension_version;
pub mod fetch;
pub mod parser;
pub mod profile;
pub mod registry;
pub mod repository;
pub mod schema_patch;
mod util;
pub mod warning;

pub use archive::{FileContent, FileMap};
pub use codelist::{Codelist, CodelistCode};
pub use codelist_patch::{patch_codelists, CodelistCollector};
pub use config::{ExportResult, ProfileConfig};
pub use error::{Error, Result};
pub use extension_version::{ExtensionInfo, ExtensionVersion, Metadata, VersionRow};
pub use fetch::{Fetch, HttpFetcher, StaticFetcher};
pub use parser::parse_rows;
pub use profile::{dereference, ExtensionSelection, ProfileBuilder};
pub use registry::{get_latest_version, ExtensionRegistry, VersionFilter};
pub use schema_patch::{merge_patch, PatchOptions};
pub use util::json_dump;
pub use warning::{Inconsistency, Merged, Warning};
