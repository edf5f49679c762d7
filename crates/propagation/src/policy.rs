//! Propagation policy: the set of header names that are not copied from an
//! inbound message to the message a handler produces.

use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while building a [`PropagationPolicy`].
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A wildcard entry did not compile.
    #[error("invalid header pattern '{pattern}': {source}")]
    InvalidPattern {
        /// Entry as configured.
        pattern: String,
        /// Underlying regex error.
        #[source]
        source: regex::Error,
    },
    /// The policy file could not be opened.
    #[error("failed to open policy file {path:?}: {source}")]
    Io {
        /// Path that was opened.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The policy file is not valid YAML for [`PolicyFile`].
    #[error("malformed YAML in policy file {path:?}: {source}")]
    Parse {
        /// Path that was parsed.
        path: PathBuf,
        /// Underlying YAML error.
        #[source]
        source: serde_yaml::Error,
    },
}

/// Header list as it appears in configuration: either `"a,b"` or `[a, b]`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum HeaderList {
    /// Comma-separated names.
    Csv(String),
    /// One name per entry.
    List(Vec<String>),
}

impl Default for HeaderList {
    fn default() -> Self {
        HeaderList::List(Vec::new())
    }
}

impl HeaderList {
    /// Trimmed, non-blank entries.
    pub fn entries(&self) -> Vec<String> {
        let raw: Vec<&str> = match self {
            HeaderList::Csv(s) => s.split(',').collect(),
            HeaderList::List(v) => v.iter().map(String::as_str).collect(),
        };
        raw.into_iter().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
    }
}

/// `deserialize_with` helper: a present but empty value (`key:`) is YAML
/// null and means no entries.
pub fn header_list_or_default<'de, D>(deserializer: D) -> Result<HeaderList, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<HeaderList>::deserialize(deserializer)?.unwrap_or_default())
}

/// On-disk form of a standalone policy file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyFile {
    /// Headers that are not propagated.
    #[serde(
        default,
        alias = "notPropagatedHeaders",
        deserialize_with = "header_list_or_default"
    )]
    pub not_propagated_headers: HeaderList,
}

/// Immutable set of excluded header names.
///
/// Entries match header names exactly (case-sensitive). An entry containing
/// `*` is a simple wildcard pattern where `*` matches any run of characters.
/// The default policy excludes nothing.
#[derive(Debug, Clone, Default)]
pub struct PropagationPolicy {
    names: BTreeSet<String>,
    patterns: Vec<(String, Regex)>,
}

impl PropagationPolicy {
    /// Build a policy from individual entries. Blank entries are ignored.
    pub fn new<I, S>(entries: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names = BTreeSet::new();
        let mut patterns: Vec<(String, Regex)> = Vec::new();
        for entry in entries {
            let entry: String = entry.into();
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            if entry.contains('*') {
                if patterns.iter().any(|(p, _)| p == entry) {
                    continue;
                }
                let re = compile_wildcard(entry).map_err(|source| PolicyError::InvalidPattern {
                    pattern: entry.to_string(),
                    source,
                })?;
                patterns.push((entry.to_string(), re));
            } else {
                names.insert(entry.to_string());
            }
        }
        Ok(Self { names, patterns })
    }

    /// Parse the comma-separated property form, e.g. `"bar,contentType"`.
    pub fn from_comma_list(list: &str) -> Result<Self, PolicyError> {
        Self::new(HeaderList::Csv(list.to_string()).entries())
    }

    /// Build from a configured [`HeaderList`] in either form.
    pub fn from_header_list(list: &HeaderList) -> Result<Self, PolicyError> {
        Self::new(list.entries())
    }

    /// Load a standalone policy file from YAML.
    pub fn load_from_yaml_path<P: AsRef<Path>>(path: P) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let f = File::open(path)
            .map_err(|source| PolicyError::Io { path: path.to_path_buf(), source })?;
        let pf: PolicyFile = serde_yaml::from_reader(BufReader::new(f))
            .map_err(|source| PolicyError::Parse { path: path.to_path_buf(), source })?;
        Self::from_header_list(&pf.not_propagated_headers)
    }

    /// Whether a header with this name is dropped when propagating.
    pub fn is_excluded(&self, name: &str) -> bool {
        self.names.contains(name) || self.patterns.iter().any(|(_, re)| re.is_match(name))
    }

    /// True when nothing is excluded (pure pass-through).
    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.patterns.is_empty()
    }

    /// Configured entries: exact names first, then patterns in configuration order.
    pub fn excluded(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str).chain(self.patterns.iter().map(|(p, _)| p.as_str()))
    }
}

fn compile_wildcard(pattern: &str) -> Result<Regex, regex::Error> {
    let body = pattern.split('*').map(regex::escape).collect::<Vec<_>>().join(".*");
    Regex::new(&format!("^{}$", body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comma_list_trims_and_skips_blanks() {
        let p = PropagationPolicy::from_comma_list(" bar , ,contentType,bar").unwrap();
        let got: Vec<&str> = p.excluded().collect();
        assert_eq!(got, vec!["bar", "contentType"]);
        assert!(p.is_excluded("bar"));
        assert!(!p.is_excluded("Bar"));
        assert!(!p.is_excluded("foo"));
    }

    #[test]
    fn empty_config_excludes_nothing() {
        assert!(PropagationPolicy::from_comma_list("").unwrap().is_empty());
        assert!(PropagationPolicy::default().is_empty());
        assert!(!PropagationPolicy::default().is_excluded("anything"));
    }

    #[test]
    fn wildcards_match_runs() {
        let p = PropagationPolicy::new(["x-*", "*-trace", "a*c"]).unwrap();
        assert!(p.is_excluded("x-a"));
        assert!(p.is_excluded("x-"));
        assert!(p.is_excluded("b3-trace"));
        assert!(p.is_excluded("abbc"));
        assert!(!p.is_excluded("y"));
        assert!(!p.is_excluded("abcd"));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let p = PropagationPolicy::new(["a.b*"]).unwrap();
        assert!(p.is_excluded("a.bc"));
        assert!(!p.is_excluded("axbc"));
    }

    #[test]
    fn star_alone_excludes_everything() {
        let p = PropagationPolicy::new(["*"]).unwrap();
        assert!(p.is_excluded("foo"));
        assert!(p.is_excluded(""));
    }

    #[test]
    fn header_list_accepts_both_forms() {
        let csv: HeaderList = serde_yaml::from_str("\"bar, contentType\"").unwrap();
        let list: HeaderList = serde_yaml::from_str("[bar, contentType]").unwrap();
        assert_eq!(csv.entries(), list.entries());
    }

    #[test]
    fn null_value_is_empty_list() {
        let pf: PolicyFile = serde_yaml::from_str("not_propagated_headers:\n").unwrap();
        assert_eq!(pf.not_propagated_headers, HeaderList::default());
        assert!(PropagationPolicy::from_header_list(&pf.not_propagated_headers).unwrap().is_empty());
    }
}
