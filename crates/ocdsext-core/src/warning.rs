//! Non-fatal problems found while merging extensions

use serde::Serialize;
use std::fmt;
use tracing::warn;

/// How a codelist patch disagrees with a replacement codelist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Inconsistency {
    /// A code added by the patch is missing from the replacement
    Added,
    /// A code removed by the patch is present in the replacement
    Removed,
}

/// A problem that was skipped over, rather than failing the merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Warning {
    /// An extension's files couldn't be retrieved or decoded
    Extension { extension: String, error: String },
    /// One of an extension's codelists couldn't be retrieved or decoded
    Codelist {
        extension: String,
        codelist: String,
        error: String,
    },
    /// A codelist patch disagrees with a replacement codelist
    Consistency {
        codelist: String,
        patch: String,
        code: String,
        kind: Inconsistency,
    },
}

impl Warning {
    /// Log the warning, and return it
    pub(crate) fn emit(self) -> Self {
        warn!("{}", self);
        self
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::Extension { extension, error } => {
                write!(f, "{extension}: {error}")
            }
            Warning::Codelist {
                extension,
                codelist,
                error,
            } => write!(f, "{extension}: {codelist}: {error}"),
            Warning::Consistency {
                codelist,
                patch,
                code,
                kind: Inconsistency::Added,
            } => write!(f, "{code} added by {patch}, but not in {codelist}"),
            Warning::Consistency {
                codelist,
                patch,
                code,
                kind: Inconsistency::Removed,
            } => write!(f, "{code} removed by {patch}, but in {codelist}"),
        }
    }
}

/// A merged value, with the warnings produced while merging it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Merged<T> {
    pub value: T,
    pub warnings: Vec<Warning>,
}

impl<T> Merged<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }

    /// Transform the value, keeping the warnings
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Merged<U> {
        Merged {
            value: f(self.value),
            warnings: self.warnings,
        }
    }

    /// Whether merging produced no warnings
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn into_parts(self) -> (T, Vec<Warning>) {
        (self.value, self.warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let warning = Warning::Consistency {
            codelist: "method.csv".into(),
            patch: "+method.csv".into(),
            code: "limited".into(),
            kind: Inconsistency::Added,
        };
        assert_eq!(warning.to_string(), "limited added by +method.csv, but not in method.csv");

        let warning = Warning::Codelist {
            extension: "lots==v1.1.4".into(),
            codelist: "+partyRole.csv".into(),
            error: "HTTP status 404".into(),
        };
        assert_eq!(warning.to_string(), "lots==v1.1.4: +partyRole.csv: HTTP status 404");
    }

    #[test]
    fn test_serialize_tagged() {
        let warning = Warning::Extension {
            extension: "bids".into(),
            error: "ZIP error".into(),
        };
        let value = serde_json::to_value(&warning).unwrap();
        assert_eq!(value["type"], "extension");
        assert_eq!(value["extension"], "bids");
    }

    #[test]
    fn test_merged_map() {
        let mut merged = Merged::new(1);
        merged.warnings.push(Warning::Extension {
            extension: "bids".into(),
            error: "x".into(),
        });
        let merged = merged.map(|n| n + 1);
        assert_eq!(merged.value, 2);
        assert!(!merged.is_clean());
    }
}
