//! Unpacking extension and standard archives into in-memory file sets

use crate::error::{Error, Result};
use indexmap::IndexMap;
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;
use zip::ZipArchive;

/// File contents keyed by path relative to the archive's root
pub type FileMap = IndexMap<String, FileContent>;

/// Extensions of files decoded as UTF-8 text
const TEXT_EXTENSIONS: &[&str] = &["csv", "json", "md"];

/// Files never exposed as part of an extension
const IGNORED_FILES: &[&str] = &[".travis.yml"];

/// The contents of one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    /// A CSV, JSON or Markdown file
    Text(String),
    /// Any other file
    Binary(Vec<u8>),
}

impl FileContent {
    /// The text, if the file was decoded as text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FileContent::Text(text) => Some(text),
            FileContent::Binary(_) => None,
        }
    }

    /// The raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FileContent::Text(text) => text.as_bytes(),
            FileContent::Binary(bytes) => bytes,
        }
    }

    fn decode(name: &str, bytes: Vec<u8>) -> Result<Self> {
        if is_text(name) {
            String::from_utf8(bytes)
                .map(FileContent::Text)
                .map_err(|_| Error::Utf8 {
                    name: name.to_string(),
                })
        } else {
            Ok(FileContent::Binary(bytes))
        }
    }
}

fn is_text(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext))
}

fn is_ignored(name: &str) -> bool {
    IGNORED_FILES.contains(&name)
}

/// Largest buffer reserved up front for a member, whatever its header declares
const MAX_CAPACITY_HINT: u64 = 1 << 20;

fn capacity_hint(declared_size: u64) -> usize {
    declared_size.min(MAX_CAPACITY_HINT) as usize
}

/// Unpack a ZIP archive
///
/// The archive must contain a single top-level directory, whose name varies
/// (it typically includes a commit hash). That directory is stripped from
/// every member's path. Directory entries and ignored files are skipped.
pub fn unpack(bytes: &[u8]) -> Result<FileMap> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut files = FileMap::new();

    let mut prefix: Option<String> = None;
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let name = file.name().to_string();

        let top = prefix.get_or_insert_with(|| match name.find('/') {
            Some(index) => name[..=index].to_string(),
            None => String::new(),
        });
        let Some(relative) = name.strip_prefix(top.as_str()) else {
            continue;
        };
        if relative.is_empty() || file.is_dir() || is_ignored(relative) {
            continue;
        }

        let mut content = Vec::with_capacity(capacity_hint(file.size()));
        file.read_to_end(&mut content)?;
        files.insert(relative.to_string(), FileContent::decode(relative, content)?);
    }

    debug!("unpacked {} files from archive", files.len());
    Ok(files)
}

/// Read a local directory tree, as if it were an unpacked archive
pub fn read_directory<P: AsRef<Path>>(root: P) -> Result<FileMap> {
    let root = root.as_ref();
    let mut files = FileMap::new();

    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if is_ignored(&relative) {
            continue;
        }

        let content = std::fs::read(path).map_err(|e| Error::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        files.insert(relative.clone(), FileContent::decode(&relative, content)?);
    }

    debug!("read {} files from {}", files.len(), root.display());
    Ok(files)
}

/// Select the files under `prefix`, keyed by their path relative to it
pub fn subtree(files: &FileMap, prefix: &str) -> FileMap {
    files
        .iter()
        .filter_map(|(name, content)| {
            name.strip_prefix(prefix)
                .filter(|relative| !relative.is_empty())
                .map(|relative| (relative.to_string(), content.clone()))
        })
        .collect()
}
