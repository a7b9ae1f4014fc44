//! Optional allow-list of item names read from the user's `.repo_list`.
//!
//! A missing file, or one without any non-blank line, means "include
//! everything". It never means "include nothing".

use std::collections::BTreeSet;
use std::io;
use std::path::Path;

use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InclusionFilter {
    only: BTreeSet<String>,
}

impl InclusionFilter {
    /// A filter that lets everything through.
    pub fn unfiltered() -> Self {
        Self::default()
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let only = names
            .into_iter()
            .map(|n| n.as_ref().trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        Self { only }
    }

    /// One name per line, whitespace-trimmed.
    pub fn parse(content: &str) -> Self {
        Self::from_names(content.lines())
    }

    /// Loads the filter file; an absent file yields an unfiltered filter.
    pub fn load(path: &Path) -> io::Result<Self> {
        if !path.is_file() {
            debug!(path = %path.display(), "No inclusion filter file, archiving everything");
            return Ok(Self::unfiltered());
        }
        let content = std::fs::read_to_string(path)?;
        let filter = Self::parse(&content);
        info!(
            path = %path.display(),
            names = filter.only.len(),
            "Loaded inclusion filter"
        );
        Ok(filter)
    }

    pub fn is_unfiltered(&self) -> bool {
        self.only.is_empty()
    }

    /// Exact, case-sensitive membership.
    pub fn includes(&self, name: &str) -> bool {
        self.only.is_empty() || self.only.contains(name)
    }

    /// Keeps the elements whose name passes the filter.
    pub fn retain<T>(&self, items: Vec<T>, name_of: impl Fn(&T) -> &str) -> Vec<T> {
        if self.is_unfiltered() {
            return items;
        }
        items.into_iter().filter(|i| self.includes(name_of(i))).collect()
    }
}
