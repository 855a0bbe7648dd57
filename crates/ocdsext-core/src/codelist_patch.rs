//! Merging extensions' codelists with each other and with the standard's
//!
//! Extensions contribute new codelists (`name.csv`), replacements of the
//! standard's codelists (also `name.csv`), additions (`+name.csv`) and removals
//! (`-name.csv`). New codelists and replacements must be identical across the
//! extensions that provide them. Additions and removals accumulate.

use crate::codelist::{Codelist, CODE};
use crate::error::{Error, Result};
use crate::parser::parse_rows;
use crate::warning::{Inconsistency, Merged, Warning};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Collects extensions' codelists, in extension order
#[derive(Debug, Default)]
pub struct CodelistCollector {
    codelists: IndexMap<String, Codelist>,
    /// The first-seen text of each codelist
    originals: HashMap<String, String>,
}

impl CodelistCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one extension's codelist file
    ///
    /// Fails with [`Error::CodelistConflict`] if the codelist isn't a patch and
    /// an earlier extension provided different content for it, or with a CSV
    /// error if the content can't be parsed.
    pub fn add(&mut self, extension_name: &str, name: &str, content: &str) -> Result<()> {
        if let Some(existing) = self.codelists.get(name) {
            if !existing.patch() {
                if self.originals.get(name).map(String::as_str) != Some(content) {
                    return Err(Error::CodelistConflict(name.to_string()));
                }
                return Ok(());
            }
        }

        let rows = parse_rows(content, name)?;
        self.originals
            .entry(name.to_string())
            .or_insert_with(|| content.to_string());
        self.codelists
            .entry(name.to_string())
            .or_insert_with(|| Codelist::new(name))
            .extend(rows, Some(extension_name));
        Ok(())
    }

    /// Drop the additions and removals that a replacement already reflects
    ///
    /// A patch whose codelist was also provided in full is discarded. An added
    /// code missing from the full codelist, or a removed code present in it,
    /// produces a warning.
    pub fn finish(mut self) -> Merged<IndexMap<String, Codelist>> {
        let mut warnings = Vec::new();

        let absorbed: Vec<String> = self
            .codelists
            .values()
            .filter(|codelist| codelist.patch() && self.codelists.contains_key(codelist.basename()))
            .map(|codelist| codelist.name.clone())
            .collect();

        for name in absorbed {
            let Some(patch) = self.codelists.shift_remove(&name) else {
                continue;
            };
            let basename = patch.basename();
            let codes: HashSet<&str> = self
                .codelists
                .get(basename)
                .map(|full| full.codes().into_iter().collect())
                .unwrap_or_default();

            let kind = if patch.addend() {
                Inconsistency::Added
            } else {
                Inconsistency::Removed
            };
            for code in patch.codes() {
                let inconsistent = match kind {
                    Inconsistency::Added => !codes.contains(code),
                    Inconsistency::Removed => codes.contains(code),
                };
                if inconsistent {
                    warnings.push(
                        Warning::Consistency {
                            codelist: basename.to_string(),
                            patch: patch.name.clone(),
                            code: code.to_string(),
                            kind,
                        }
                        .emit(),
                    );
                }
            }

            match kind {
                Inconsistency::Added => {
                    info!("{} has the codes added by {} - ignoring {}", basename, name, name)
                }
                Inconsistency::Removed => {
                    info!("{} has no codes removed by {} - ignoring {}", basename, name, name)
                }
            }
        }

        Merged {
            value: self.codelists,
            warnings,
        }
    }
}

/// Apply extensions' codelists to the standard's codelists
///
/// New codelists and replacements are set, additions append rows, and
/// removals drop every row with a removed code. Fails with
/// [`Error::CodelistNotFound`] if a patch targets a codelist that doesn't exist.
pub fn patch_codelists<I>(
    standard: IndexMap<String, Codelist>,
    extension: I,
) -> Result<IndexMap<String, Codelist>>
where
    I: IntoIterator<Item = Codelist>,
{
    let mut codelists = standard;

    for codelist in extension {
        if !codelist.patch() {
            debug!("setting {}", codelist.name);
            codelists.insert(codelist.name.clone(), codelist);
            continue;
        }

        let basename = codelist.basename().to_string();
        let Some(target) = codelists.get_mut(&basename) else {
            return Err(Error::CodelistNotFound {
                patch: codelist.name,
                basename,
            });
        };

        if codelist.addend() {
            target.rows.extend(codelist.rows);
        } else {
            let removed: HashSet<&str> = codelist.codes().into_iter().collect();
            target.rows.retain(|row| !removed.contains(row.get(CODE).unwrap_or_default()));
        }
    }

    Ok(codelists)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codelist::CORE;

    fn standard(name: &str, content: &str) -> IndexMap<String, Codelist> {
        let mut codelist = Codelist::new(name);
        codelist.extend(parse_rows(content, name).unwrap(), Some(CORE));
        IndexMap::from([(name.to_string(), codelist)])
    }

    #[test]
    fn test_identical_new_codelists() {
        let mut collector = CodelistCollector::new();
        collector.add("A", "foo.csv", "Code\na\nb\n").unwrap();
        collector.add("B", "foo.csv", "Code\na\nb\n").unwrap();

        let merged = collector.finish();
        assert_eq!(merged.value.len(), 1);
        assert_eq!(merged.value["foo.csv"].codes(), vec!["a", "b"]);
        assert_eq!(merged.value["foo.csv"].rows[0].extension_name.as_deref(), Some("A"));
    }

    #[test]
    fn test_differing_new_codelists() {
        let mut collector = CodelistCollector::new();
        collector.add("A", "foo.csv", "Code\na\n").unwrap();

        let err = collector.add("B", "foo.csv", "Code\nb\n").unwrap_err();
        assert!(matches!(err, Error::CodelistConflict(name) if name == "foo.csv"));
    }

    #[test]
    fn test_patches_accumulate() {
        let mut collector = CodelistCollector::new();
        collector.add("A", "+method.csv", "Code\nlimited\n").unwrap();
        collector.add("B", "+method.csv", "Code\nlimited\ndirect\n").unwrap();

        let merged = collector.finish();
        assert!(merged.is_clean());
        assert_eq!(merged.value["+method.csv"].codes(), vec!["limited", "limited", "direct"]);
    }

    #[test]
    fn test_consistent_replacement_absorbs_patch() {
        let mut collector = CodelistCollector::new();
        collector.add("A", "+method.csv", "Code\nlimited\n").unwrap();
        collector.add("B", "method.csv", "Code\nopen\nlimited\n").unwrap();
        collector.add("C", "-method.csv", "Code\nselective\n").unwrap();

        let merged = collector.finish();
        assert!(merged.is_clean());
        assert_eq!(merged.value.keys().collect::<Vec<_>>(), vec!["method.csv"]);
    }

    #[test]
    fn test_inconsistent_replacement_warns() {
        let mut collector = CodelistCollector::new();
        collector.add("A", "method.csv", "Code\nopen\nselective\n").unwrap();
        collector.add("B", "+method.csv", "Code\nlimited\n").unwrap();
        collector.add("C", "-method.csv", "Code\nselective\n").unwrap();

        let merged = collector.finish();
        assert_eq!(merged.value.keys().collect::<Vec<_>>(), vec!["method.csv"]);
        assert_eq!(
            merged
                .warnings
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
            vec![
                "limited added by +method.csv, but not in method.csv",
                "selective removed by -method.csv, but in method.csv",
            ]
        );
    }

    #[test]
    fn test_patch_codelists_adds_and_removes() {
        let standard = standard("method.csv", "Code\nopen\nselective\n");

        let mut addend = Codelist::new("+method.csv");
        addend.extend(parse_rows("Code\nlimited\n", "+method.csv").unwrap(), Some("Lots"));
        let mut subtrahend = Codelist::new("-method.csv");
        subtrahend.extend(parse_rows("Code\nselective\n", "-method.csv").unwrap(), Some("A"));
        let mut again = Codelist::new("-method.csv");
        again.extend(parse_rows("Code\nselective\n", "-method.csv").unwrap(), Some("B"));

        let patched = patch_codelists(standard, [addend, subtrahend, again]).unwrap();

        let method = &patched["method.csv"];
        assert_eq!(method.codes(), vec!["open", "limited"]);
        assert_eq!(method.rows[0].extension_name.as_deref(), Some(CORE));
        assert_eq!(method.rows[1].extension_name.as_deref(), Some("Lots"));
    }

    #[test]
    fn test_patch_codelists_replaces_and_adds_new() {
        let standard = standard("method.csv", "Code\nopen\n");

        let mut replacement = Codelist::new("method.csv");
        replacement.extend(parse_rows("Code\ndirect\n", "method.csv").unwrap(), Some("A"));
        let mut new = Codelist::new("bidStatus.csv");
        new.extend(parse_rows("Code\nvalid\n", "bidStatus.csv").unwrap(), Some("Bids"));

        let patched = patch_codelists(standard, [replacement, new]).unwrap();

        assert_eq!(patched.keys().collect::<Vec<_>>(), vec!["method.csv", "bidStatus.csv"]);
        assert_eq!(patched["method.csv"].codes(), vec!["direct"]);
    }

    #[test]
    fn test_patch_codelists_missing_target() {
        let mut addend = Codelist::new("+partyRole.csv");
        addend.extend(parse_rows("Code\nagent\n", "+partyRole.csv").unwrap(), Some("A"));

        let err = patch_codelists(IndexMap::new(), [addend]).unwrap_err();
        assert!(matches!(err, Error::CodelistNotFound { basename, .. } if basename == "partyRole.csv"));
    }
}
