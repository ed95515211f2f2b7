//! Glob-based include/exclude filtering for received files
//!
//! Glob syntax:
//! - `**/` matches zero or more leading directories
//! - `**` matches any run of characters, including `/`
//! - `*` matches any run of characters except `/`
//! - `?` matches one character except `/`
//!
//! Everything else is literal and a pattern must match the whole name.

use regex::Regex;

use crate::types::NodeConfig;

/// Translate a glob into an anchored regular expression
fn glob_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() * 2 + 2);
    regex.push('^');

    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    chars.next();
                    regex.push_str("(?:.*/)?");
                } else {
                    regex.push_str(".*");
                }
            }
            '*' => regex.push_str("[^/]*"),
            '?' => regex.push_str("[^/]"),
            other => {
                let mut buf = [0u8; 4];
                regex.push_str(&regex::escape(other.encode_utf8(&mut buf)));
            }
        }
    }

    regex.push('$');
    regex
}

/// A single compiled glob pattern
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Option<Regex>,
}

impl GlobPattern {
    /// Compile a glob; surrounding whitespace is ignored
    pub fn new(pattern: &str) -> Self {
        let source = pattern.trim().to_string();
        // Every metacharacter is escaped, so compilation only fails on size limits
        let regex = Regex::new(&glob_to_regex(&source)).ok();
        Self { source, regex }
    }

    /// The trimmed glob text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether `name` matches this pattern in full
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.regex.as_ref().is_some_and(|re| re.is_match(name))
    }
}

/// One-shot match of `pattern` against `name`
#[must_use]
pub fn glob_matches(pattern: &str, name: &str) -> bool {
    GlobPattern::new(pattern).matches(name)
}

/// Include/exclude rule set of one node
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    include: Vec<GlobPattern>,
    exclude: Vec<GlobPattern>,
}

impl FileFilter {
    /// Compile include and exclude lists
    pub fn new<I, E, S, T>(include: I, exclude: E) -> Self
    where
        I: IntoIterator<Item = S>,
        E: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Self {
            include: include
                .into_iter()
                .map(|p| GlobPattern::new(p.as_ref()))
                .collect(),
            exclude: exclude
                .into_iter()
                .map(|p| GlobPattern::new(p.as_ref()))
                .collect(),
        }
    }

    /// Build the filter of a node configuration
    #[must_use]
    pub fn from_config(config: &NodeConfig) -> Self {
        Self::new(&config.file_patterns, &config.exclude_patterns)
    }

    /// Exclude patterns win; an empty include list accepts everything else
    #[must_use]
    pub fn should_accept(&self, name: &str) -> bool {
        if self.exclude.iter().any(|p| p.matches(name)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|p| p.matches(name))
    }
}

/// Whether a received file stays on disk for this node
///
/// Rules only apply when `auto_accept` is set; otherwise every file is kept
/// and confirmation is left to the caller.
#[must_use]
pub fn should_keep(name: &str, config: &NodeConfig) -> bool {
    !config.auto_accept || FileFilter::from_config(config).should_accept(name)
}
