//! Error types for ocdsext-core

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ocdsext-core
#[derive(Debug, Error)]
pub enum Error {
    /// A file is not among an extension's files
    #[error("file '{name}' not found")]
    FileNotFound { name: String },

    /// A file is not among the standard's schema files
    #[error("file '{0}' not found in the standard")]
    StandardFileNotFound(String),

    /// No extension version matches a filter
    #[error("extension version matching {0} does not exist")]
    DoesNotExist(String),

    /// A codelist patch targets a codelist that doesn't exist
    #[error("{patch} modifies {basename}, but {basename} does not exist")]
    CodelistNotFound { patch: String, basename: String },

    /// A filter uses category or core, but no extensions manifest was loaded
    #[error("extension registry must be initialized with extensions data")]
    MissingExtensionMetadata,

    /// The latest version of an extension can't be determined
    #[error("couldn't determine the latest version of {0}")]
    UnknownLatestVersion(String),

    /// A new or replacement codelist differs across extensions
    #[error("codelist {0} differs across extensions")]
    CodelistConflict(String),

    /// An extension selection mixes locators with ids
    #[error("can't mix extension locators and ids in one selection: {0}")]
    MixedSelection(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP response with a non-success status
    #[error("HTTP status {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    /// A locator with a scheme we can't retrieve
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// Invalid URL
    #[error("invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// ZIP archive error
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Contents that should be text aren't UTF-8
    #[error("'{name}' is not valid UTF-8")]
    Utf8 { name: String },

    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Directory traversal error
    #[error("failed to traverse directory: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// CSV error from the csv crate
    #[error("CSV error in '{name}': {source}")]
    Csv {
        name: String,
        #[source]
        source: csv::Error,
    },

    /// extension.json has an unexpected shape
    #[error("invalid extension metadata: {0}")]
    InvalidMetadata(String),

    /// The repository can't be determined from the base URL
    #[error("can't determine {property} from {url}")]
    UnknownRepository { property: String, url: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error means the requested file is absent, rather than broken.
    ///
    /// Only a 404 counts: other statuses are failures of the server.
    pub fn is_absent(&self) -> bool {
        matches!(
            self,
            Error::FileNotFound { .. } | Error::HttpStatus { status: 404, .. }
        )
    }

    /// Whether the error comes from retrieving or decoding remote content.
    ///
    /// Bulk merges skip an extension on these errors instead of failing.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Http(_)
                | Error::HttpStatus { .. }
                | Error::UnsupportedScheme(_)
                | Error::InvalidUrl { .. }
                | Error::Zip(_)
                | Error::Utf8 { .. }
                | Error::Json(_)
                | Error::FileRead { .. }
                | Error::Csv { .. }
        )
    }
}
