//! Exclusion patterns for picking analysis candidates out of a change set.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

/// Files that are rarely useful as agent context: media, archives, build
/// output, dependency caches, lock files, and environment files.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "*.jpg", "*.jpeg", "*.png", "*.gif", "*.bmp", "*.svg", "*.webp", "*.ico", "*.tiff",
    "*.pdf", "*.doc", "*.docx",
    "*.exe", "*.dll", "*.so", "*.dylib", "*.bin", "*.zip", "*.tar", "*.gz", "*.rar",
    "*.mp4", "*.avi", "*.mov", "*.mp3", "*.wav", "*.ogg",
    "*.lock", "*.log", "*.cache", "package-lock.json",
    "*.min.*",
    "*node_modules*", "*__pycache__*", "dist/*", "build/*", "target/*",
    ".env", ".env.*",
];

/// Matches repository-relative paths against a set of glob patterns.
///
/// A pattern excludes a path if it matches either the full path or its
/// final component, case-insensitively.
#[derive(Debug, Clone)]
pub struct PathFilter {
    set: GlobSet,
    patterns: Vec<String>,
}

impl PathFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, globset::Error> {
        let mut builder = GlobSetBuilder::new();
        let mut kept = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let pattern = pattern.as_ref();
            builder.add(GlobBuilder::new(pattern).case_insensitive(true).build()?);
            kept.push(pattern.to_string());
        }
        Ok(Self {
            set: builder.build()?,
            patterns: kept,
        })
    }

    /// Built-in excludes followed by `extra`.
    pub fn with_defaults<S: AsRef<str>>(extra: &[S]) -> Result<Self, globset::Error> {
        let mut all: Vec<&str> = DEFAULT_EXCLUDES.to_vec();
        all.extend(extra.iter().map(AsRef::as_ref));
        Self::new(&all)
    }

    pub fn from_config(cfg: &crate::config::FilterConfig) -> Result<Self, globset::Error> {
        if cfg.use_default_excludes {
            Self::with_defaults(&cfg.exclude)
        } else {
            Self::new(&cfg.exclude)
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        if self.set.is_match(path) {
            return true;
        }
        match path.rsplit_once('/') {
            Some((_, name)) => self.set.is_match(name),
            None => false,
        }
    }
}

impl Default for PathFilter {
    fn default() -> Self {
        Self {
            set: GlobSet::empty(),
            patterns: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_exclude_media_and_locks() {
        let filter = PathFilter::with_defaults::<&str>(&[]).unwrap();
        assert!(filter.is_excluded("assets/Logo.PNG"));
        assert!(filter.is_excluded("Cargo.lock"));
        assert!(filter.is_excluded("web/node_modules/react/index.js"));
        assert!(filter.is_excluded("config/.env.local"));
        assert!(filter.is_excluded("static/app.min.js"));
        assert!(!filter.is_excluded("src/main.rs"));
        assert!(!filter.is_excluded("docs/latest.rs"));
    }

    #[test]
    fn extra_patterns_apply() {
        let filter = PathFilter::with_defaults(&["generated/*"]).unwrap();
        assert!(filter.is_excluded("generated/schema.rs"));
        assert!(!filter.is_excluded("src/schema.rs"));
    }

    #[test]
    fn empty_filter_excludes_nothing() {
        let filter = PathFilter::default();
        assert!(!filter.is_excluded("anything.png"));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(PathFilter::new(&["src/[unclosed"]).is_err());
    }
}
