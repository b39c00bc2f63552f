//! Output-path filters for downloads.
//!
//! A filter list selects which parts of a job's session directory are
//! downloaded. Names are relative to the session root and use `/` separators.
//!
//! - An empty list selects everything.
//! - A pattern equal to a file name selects that file.
//! - A pattern ending in `/` selects everything below that directory.
//! - A directory is listed when it is selected, or when it lies on the way to
//!   a selected path (`a/b/c.txt` causes `a` and `a/b` to be listed).
//!
//! A bare `/` is an ordinary pattern: it selects nothing, because no
//! session-relative name starts with `/`. Use an empty list to select
//! everything.

/// Download filter for one job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputFilter {
    patterns: Vec<String>,
}

impl OutputFilter {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    /// A filter that selects everything.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Returns `true` if the file `name` should be downloaded.
    pub fn accepts_file(&self, name: &str) -> bool {
        self.is_empty()
            || self
                .patterns
                .iter()
                .any(|p| p == name || (p.ends_with('/') && name.starts_with(p.as_str())))
    }

    /// Returns `true` if the directory `name` should be listed.
    pub fn accepts_dir(&self, name: &str) -> bool {
        if self.is_empty() {
            return true;
        }
        let with_slash = format!("{name}/");
        self.patterns.iter().any(|p| {
            p == name
                || p.starts_with(&with_slash)
                || (p.ends_with('/') && name.starts_with(p.as_str()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_accepts_everything() {
        let filter = OutputFilter::all();
        assert!(filter.accepts_file("stdout"));
        assert!(filter.accepts_dir("results"));
    }

    #[test]
    fn exact_file_match() {
        let filter = OutputFilter::new(["stdout"]);
        assert!(filter.accepts_file("stdout"));
        assert!(!filter.accepts_file("stderr"));
        assert!(!filter.accepts_file("stdout.gz"));
    }

    #[test]
    fn directory_patterns_are_recursive() {
        let filter = OutputFilter::new(["results/"]);
        assert!(filter.accepts_dir("results"));
        assert!(filter.accepts_dir("results/run1"));
        assert!(filter.accepts_file("results/run1/out.root"));
        assert!(!filter.accepts_file("results.txt"));
        assert!(!filter.accepts_dir("logs"));
    }

    #[test]
    fn ancestors_of_nested_patterns_are_listed() {
        let filter = OutputFilter::new(["a/b/c.txt"]);
        assert!(filter.accepts_dir("a"));
        assert!(filter.accepts_dir("a/b"));
        assert!(filter.accepts_file("a/b/c.txt"));
        assert!(!filter.accepts_file("a/b/d.txt"));
        assert!(!filter.accepts_dir("a/bc"));
    }

    #[test]
    fn bare_root_pattern_selects_nothing() {
        let filter = OutputFilter::new(["/"]);
        assert!(!filter.accepts_file("stdout"));
        assert!(!filter.accepts_dir("results"));
    }
}
