//! Repository information derived from an extension version's base URL

use crate::error::{Error, Result};
use crate::extension_version::ExtensionVersion;
use once_cell::sync::OnceCell;
use regex::Regex;
use url::Url;

/// How to read repository information from a hosting service's raw file URLs
struct Host {
    full_name: &'static str,
    name: &'static str,
    user: &'static str,
    html_page_prefix: &'static str,
    url_prefix: &'static str,
    url_suffix: &'static str,
}

// e.g. https://bitbucket.org/facebook/hgsql/raw/default/
const BITBUCKET: Host = Host {
    full_name: r"\A/([^/]+/[^/]+)",
    name: r"\A/[^/]+/([^/]+)",
    user: r"\A/([^/]+)",
    html_page_prefix: "https://bitbucket.org/",
    url_prefix: "https://bitbucket.org/",
    // Mercurial can't be distinguished from the base URL
    url_suffix: ".git",
};

// e.g. https://raw.githubusercontent.com/open-contracting/ocds_bid_extension/v1.1.3/
const GITHUB: Host = Host {
    full_name: r"\A/([^/]+/[^/]+)",
    name: r"\A/[^/]+/([^/]+)",
    user: r"\A/([^/]+)",
    html_page_prefix: "https://github.com/",
    url_prefix: "git@github.com:",
    url_suffix: ".git",
};

// e.g. https://gitlab.com/gitlab-org/gitter/env/raw/master/
const GITLAB: Host = Host {
    full_name: r"\A/(.+)/raw/",
    name: r"/([^/]+)/raw/",
    user: r"\A/([^/]+)",
    html_page_prefix: "https://gitlab.com/",
    url_prefix: "https://gitlab.com/",
    url_suffix: ".git",
};

fn host(domain: &str) -> Option<&'static Host> {
    match domain {
        "bitbucket.org" => Some(&BITBUCKET),
        "raw.githubusercontent.com" => Some(&GITHUB),
        "gitlab.com" => Some(&GITLAB),
        _ => None,
    }
}

/// Compiled patterns, keyed by pattern text
fn compiled(pattern: &'static str) -> Option<&'static Regex> {
    static CACHE: OnceCell<Vec<(&'static str, Regex)>> = OnceCell::new();
    let cache = CACHE.get_or_init(|| {
        [&BITBUCKET, &GITHUB, &GITLAB]
            .iter()
            .flat_map(|host| [host.full_name, host.name, host.user])
            .filter_map(|p| Regex::new(p).ok().map(|regex| (p, regex)))
            .collect()
    });
    cache.iter().find(|(p, _)| *p == pattern).map(|(_, regex)| regex)
}

fn capture(pattern: &'static str, path: &str) -> Option<String> {
    compiled(pattern)?
        .captures(path)?
        .get(1)
        .map(|m| m.as_str().to_string())
}

impl ExtensionVersion {
    /// The repository's unique name on its host, e.g. `open-contracting/ocds_bid_extension`
    pub fn repository_full_name(&self) -> Result<String> {
        self.repository_property("full_name", |host, path| capture(host.full_name, path))
    }

    /// The repository's name without its owner, e.g. `ocds_bid_extension`
    pub fn repository_name(&self) -> Result<String> {
        self.repository_property("name", |host, path| capture(host.name, path))
    }

    /// The repository's owner, e.g. `open-contracting`
    pub fn repository_user(&self) -> Result<String> {
        self.repository_property("user", |host, path| capture(host.user, path))
    }

    /// The owner's page, e.g. `https://github.com/open-contracting`
    pub fn repository_user_page(&self) -> Result<String> {
        self.repository_property("user_page", |host, path| {
            capture(host.user, path).map(|user| format!("{}{}", host.html_page_prefix, user))
        })
    }

    /// The repository's landing page, e.g. `https://github.com/open-contracting/ocds_bid_extension`
    pub fn repository_html_page(&self) -> Result<String> {
        self.repository_property("html_page", |host, path| {
            capture(host.full_name, path).map(|name| format!("{}{}", host.html_page_prefix, name))
        })
    }

    /// A URL that can be given to `git clone`
    pub fn repository_url(&self) -> Result<String> {
        self.repository_property("url", |host, path| {
            capture(host.full_name, path)
                .map(|name| format!("{}{}{}", host.url_prefix, name, host.url_suffix))
        })
    }

    fn repository_property<F>(&self, property: &str, read: F) -> Result<String>
    where
        F: FnOnce(&Host, &str) -> Option<String>,
    {
        let unknown = || Error::UnknownRepository {
            property: property.to_string(),
            url: self.base_url.clone().unwrap_or_default(),
        };

        let parsed = self
            .base_url
            .as_deref()
            .and_then(|url| Url::parse(url).ok())
            .ok_or_else(unknown)?;
        let host = parsed.host_str().and_then(host).ok_or_else(unknown)?;
        read(host, parsed.path()).ok_or_else(unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension_version::VersionRow;
    use crate::fetch::StaticFetcher;
    use std::sync::Arc;

    fn version(base_url: &str) -> ExtensionVersion {
        let row = VersionRow {
            id: "bids".into(),
            version: "v1.1.3".into(),
            base_url: Some(base_url.into()),
            ..Default::default()
        };
        ExtensionVersion::new(row, Arc::new(StaticFetcher::new()))
    }

    #[test]
    fn test_github() {
        let v = version("https://raw.githubusercontent.com/open-contracting/ocds_bid_extension/v1.1.3/");

        assert_eq!(v.repository_full_name().unwrap(), "open-contracting/ocds_bid_extension");
        assert_eq!(v.repository_name().unwrap(), "ocds_bid_extension");
        assert_eq!(v.repository_user().unwrap(), "open-contracting");
        assert_eq!(v.repository_user_page().unwrap(), "https://github.com/open-contracting");
        assert_eq!(
            v.repository_html_page().unwrap(),
            "https://github.com/open-contracting/ocds_bid_extension"
        );
        assert_eq!(
            v.repository_url().unwrap(),
            "git@github.com:open-contracting/ocds_bid_extension.git"
        );
    }

    #[test]
    fn test_bitbucket() {
        let v = version("https://bitbucket.org/facebook/hgsql/raw/default/");

        assert_eq!(v.repository_full_name().unwrap(), "facebook/hgsql");
        assert_eq!(v.repository_url().unwrap(), "https://bitbucket.org/facebook/hgsql.git");
    }

    #[test]
    fn test_gitlab() {
        let v = version("https://gitlab.com/gitlab-org/gitter/env/raw/master/");

        assert_eq!(v.repository_full_name().unwrap(), "gitlab-org/gitter/env");
        assert_eq!(v.repository_name().unwrap(), "env");
        assert_eq!(v.repository_html_page().unwrap(), "https://gitlab.com/gitlab-org/gitter/env");
    }

    #[test]
    fn test_unknown_host() {
        let v = version("https://example.com/extension/");
        let err = v.repository_url().unwrap_err();
        assert!(matches!(err, Error::UnknownRepository { property, .. } if property == "url"));
    }
}
