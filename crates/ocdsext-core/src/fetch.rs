//! Retrieval of raw files by URL

use crate::error::{Error, Result};
use parking_lot::Mutex;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;
use url::Url;

/// Retrieves the raw contents of a URL.
///
/// A non-success response is an [`Error::HttpStatus`]. Failed fetches are
/// never retried here.
pub trait Fetch: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Fetch a URL and decode it as UTF-8
pub fn fetch_text(fetcher: &dyn Fetch, url: &str) -> Result<String> {
    String::from_utf8(fetcher.fetch(url)?).map_err(|_| Error::Utf8 {
        name: url.to_string(),
    })
}

/// Whether a string is a locator (it has a URL scheme) rather than literal data
pub fn has_scheme(data: &str) -> bool {
    Url::parse(data).is_ok_and(|url| !url.scheme().is_empty())
}

/// An HTTP fetcher, which also reads `file://` URLs from the filesystem.
///
/// Successful responses are cached for the fetcher's lifetime.
#[derive(Debug, Default)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    cache: Mutex<HashMap<String, Vec<u8>>>,
}

impl HttpFetcher {
    /// Create a new fetcher with an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new fetcher with a configured client
    pub fn with_client(client: reqwest::blocking::Client) -> Self {
        Self {
            client,
            cache: Mutex::default(),
        }
    }

    fn fetch_uncached(&self, url: &str) -> Result<Vec<u8>> {
        let parsed = Url::parse(url).map_err(|source| Error::InvalidUrl {
            url: url.to_string(),
            source,
        })?;

        match parsed.scheme() {
            "http" | "https" => {
                debug!("GET {}", url);
                let response = self.client.get(parsed).send()?;
                match response.status() {
                    status if status.is_success() => Ok(response.bytes()?.to_vec()),
                    status => Err(Error::HttpStatus {
                        url: url.to_string(),
                        status: status.as_u16(),
                    }),
                }
            }
            "file" => {
                let path = parsed
                    .to_file_path()
                    .unwrap_or_else(|()| PathBuf::from(&url["file://".len()..]));
                std::fs::read(&path).map_err(|e| Error::FileRead { path, source: e })
            }
            scheme => Err(Error::UnsupportedScheme(scheme.to_string())),
        }
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        if let Some(bytes) = self.cache.lock().get(url) {
            debug!("cache hit for {}", url);
            return Ok(bytes.clone());
        }

        let bytes = self.fetch_uncached(url)?;
        self.cache.lock().insert(url.to_string(), bytes.clone());
        Ok(bytes)
    }
}

/// A fetcher that serves a fixed set of URLs from memory.
///
/// Unknown URLs get a 404 status. Every request is recorded.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    files: HashMap<String, Vec<u8>>,
    statuses: HashMap<String, u16>,
    requests: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `content` at `url`
    pub fn with(mut self, url: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.insert(url, content);
        self
    }

    pub fn insert(&mut self, url: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.files.insert(url.into(), content.into());
    }

    /// Answer `url` with a non-success status
    pub fn with_status(mut self, url: impl Into<String>, status: u16) -> Self {
        self.statuses.insert(url.into(), status);
        self
    }

    /// The URLs requested so far, in order
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    /// How many times `url` was requested
    pub fn request_count(&self, url: &str) -> usize {
        self.requests.lock().iter().filter(|u| *u == url).count()
    }
}

impl Fetch for StaticFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.requests.lock().push(url.to_string());
        if let Some(&status) = self.statuses.get(url) {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status,
            });
        }
        self.files.get(url).cloned().ok_or_else(|| Error::HttpStatus {
            url: url.to_string(),
            status: StatusCode::NOT_FOUND.as_u16(),
        })
    }
}
