//! Exclude predicates.
//!
//! `--exclude` takes a list separated like `PATH` (`:` on Unix, `;` on
//! Windows). Each element is a glob pattern; an entry is excluded when a
//! pattern matches either its file name (`core.*`) or its whole path as seen
//! by the scanner (`build/*/tmp`).

use std::ffi::OsStr;
use std::path::Path;

use glob::{MatchOptions, Pattern};

use crate::ArchiverError;

#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    patterns: Vec<Pattern>,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl ExcludeSet {
    pub fn parse(list: &OsStr) -> Result<Self, ArchiverError> {
        let mut patterns = Vec::new();
        for raw in std::env::split_paths(list) {
            let text = raw.to_string_lossy();
            if text.is_empty() {
                continue;
            }
            let pattern = Pattern::new(&text)
                .map_err(|e| ArchiverError::Config(format!("invalid exclude pattern '{text}': {e}")))?;
            patterns.push(pattern);
        }
        Ok(ExcludeSet { patterns })
    }

    pub fn from_patterns<I, S>(patterns: I) -> Result<Self, ArchiverError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                Pattern::new(p.as_ref()).map_err(|e| {
                    ArchiverError::Config(format!("invalid exclude pattern '{}': {e}", p.as_ref()))
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(ExcludeSet { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let name = path.file_name().map(Path::new);
        self.patterns.iter().any(|p| {
            name.is_some_and(|n| p.matches_path_with(n, MATCH_OPTIONS))
                || p.matches_path_with(path, MATCH_OPTIONS)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_patterns() {
        let set = ExcludeSet::from_patterns(["core.*", "*.o"]).unwrap();
        assert!(set.is_excluded(Path::new("src/core.1234")));
        assert!(set.is_excluded(Path::new("build/obj/main.o")));
        assert!(!set.is_excluded(Path::new("src/main.rs")));
        assert!(!set.is_excluded(Path::new("core")));
    }

    #[test]
    fn whole_path_patterns() {
        let set = ExcludeSet::from_patterns(["root/cache"]).unwrap();
        assert!(set.is_excluded(Path::new("root/cache")));
        assert!(!set.is_excluded(Path::new("other/cache")));
    }

    #[cfg(unix)]
    #[test]
    fn list_is_split_like_path() {
        let set = ExcludeSet::parse(OsStr::new("*.tmp:.git::target")).unwrap();
        assert_eq!(set.len(), 3);
        assert!(set.is_excluded(Path::new("a/.git")));
        assert!(set.is_excluded(Path::new("a/x.tmp")));
        assert!(set.is_excluded(Path::new("target")));
    }

    #[test]
    fn empty_list_excludes_nothing() {
        let set = ExcludeSet::parse(OsStr::new("")).unwrap();
        assert!(set.is_empty());
        assert!(!set.is_excluded(Path::new("anything")));
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        assert!(matches!(
            ExcludeSet::from_patterns(["[unclosed"]),
            Err(ArchiverError::Config(_))
        ));
    }
}
