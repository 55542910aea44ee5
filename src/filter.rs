//! Path filtering.
//!
//! A [`PathFilter`] sees paths relative to the watched root, with `/` as the
//! separator, and says whether they are interesting. Directories it rejects
//! are never registered with the watch backend, so their whole subtree is
//! pruned. Any `Fn(&str) -> bool` is a filter; [`IgnoreFilter`] is the glob
//! based one used by the command line.

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::Result;

/// Ignore list used when none is given.
pub const DEFAULT_IGNORES: &[&str] = &[".git", "_build"];

pub trait PathFilter: Send + Sync {
    /// `false` drops the path, and for a directory everything beneath it.
    fn accepts(&self, path: &str) -> bool;
}

impl<F> PathFilter for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn accepts(&self, path: &str) -> bool {
        self(path)
    }
}

/// Rejects paths matching any of a list of globs.
///
/// Patterns without a `/` are matched against every component of the path,
/// so `.git` or `*.swp` apply at any depth. Patterns with a `/` are matched
/// against the path and each of its ancestors, anchored at the root. Either
/// way a match on a directory covers everything inside it.
#[derive(Clone, Debug)]
pub struct IgnoreFilter {
    names: GlobSet,
    paths: GlobSet,
}

impl IgnoreFilter {
    pub fn new<S: AsRef<str>>(ignores: &[S]) -> Result<Self> {
        let mut names = GlobSetBuilder::new();
        let mut paths = GlobSetBuilder::new();

        for pattern in ignores {
            let pattern = pattern.as_ref().trim_matches('/');
            if pattern.is_empty() {
                continue;
            }

            if pattern.contains('/') {
                paths.add(GlobBuilder::new(pattern).literal_separator(true).build()?);
            } else {
                names.add(Glob::new(pattern)?);
            }
        }

        Ok(Self {
            names: names.build()?,
            paths: paths.build()?,
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(DEFAULT_IGNORES)
    }
}

impl PathFilter for IgnoreFilter {
    fn accepts(&self, path: &str) -> bool {
        if path.split('/').any(|name| self.names.is_match(name)) {
            return false;
        }

        !path
            .match_indices('/')
            .map(|(end, _)| &path[..end])
            .chain(Some(path))
            .any(|prefix| self.paths.is_match(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ignores_prune_vcs_and_build_dirs() {
        let filter = IgnoreFilter::with_defaults().unwrap();

        assert!(!filter.accepts(".git"));
        assert!(!filter.accepts(".git/objects/ab"));
        assert!(!filter.accepts("_build"));
        assert!(!filter.accepts("deps/app/_build/dev"));

        assert!(filter.accepts("src/main.rs"));
        assert!(filter.accepts(".github/workflows/ci.yml"));
        assert!(filter.accepts("_building.md"));
    }

    #[test]
    fn allows_everything_when_empty() {
        let filter = IgnoreFilter::new::<&str>(&[]).unwrap();

        assert!(filter.accepts(".git"));
        assert!(filter.accepts("a/b/c"));
    }

    #[test]
    fn name_globs_match_at_any_depth() {
        let filter = IgnoreFilter::new(&["*.swp", "node_modules"]).unwrap();

        assert!(!filter.accepts(".main.rs.swp"));
        assert!(!filter.accepts("src/.lib.rs.swp"));
        assert!(!filter.accepts("web/node_modules/left-pad/index.js"));
        assert!(filter.accepts("src/lib.rs"));
    }

    #[test]
    fn path_globs_are_anchored_and_cover_subtrees() {
        let filter = IgnoreFilter::new(&["target/debug", "docs/*.html"]).unwrap();

        assert!(!filter.accepts("target/debug"));
        assert!(!filter.accepts("target/debug/build/out"));
        assert!(!filter.accepts("docs/index.html"));

        assert!(filter.accepts("target/release"));
        assert!(filter.accepts("crates/x/target/debug"));
        assert!(filter.accepts("docs/api/index.html"));
    }

    #[test]
    fn bad_patterns_are_rejected() {
        assert!(IgnoreFilter::new(&["src/[a-"]).is_err());
    }

    #[test]
    fn closures_are_filters() {
        let filter = |path: &str| !path.starts_with("tmp");

        assert!(filter.accepts("src"));
        assert!(!PathFilter::accepts(&filter, "tmp/x"));
    }
}
