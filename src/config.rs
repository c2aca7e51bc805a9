use crate::{
    arch::DEFAULT_LIBRARY_PATH, image::StrTabLookup, object::CopyStrategy,
    relocation::CopyMissPolicy,
};
use std::path::PathBuf;

/// Knobs of a [`Loader`](crate::Loader).
///
/// ```
/// use elf_ld::{CopyStrategy, LoaderConfig, StrTabLookup};
///
/// let config = LoaderConfig::default()
///     .with_default_library_path("/opt/lib")
///     .with_copy_strategy(CopyStrategy::WholeImage)
///     .with_strtab_lookup(StrTabLookup::DynamicTag)
///     .with_allow_unresolved_copy(true);
/// assert_eq!(config.search_paths()[0].to_str(), Some("/opt/lib"));
/// ```
#[derive(Clone, Debug)]
pub struct LoaderConfig {
    pub(crate) default_library_path: PathBuf,
    pub(crate) copy_strategy: CopyStrategy,
    pub(crate) strtab_lookup: StrTabLookup,
    pub(crate) allow_unresolved_copy: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            default_library_path: PathBuf::from(DEFAULT_LIBRARY_PATH),
            copy_strategy: CopyStrategy::default(),
            strtab_lookup: StrTabLookup::default(),
            allow_unresolved_copy: false,
        }
    }
}

impl LoaderConfig {
    /// Directory searched before any object-provided run path.
    pub fn with_default_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.default_library_path = path.into();
        self
    }

    pub fn with_copy_strategy(mut self, strategy: CopyStrategy) -> Self {
        self.copy_strategy = strategy;
        self
    }

    pub fn with_strtab_lookup(mut self, lookup: StrTabLookup) -> Self {
        self.strtab_lookup = lookup;
        self
    }

    /// Turns a `COPY` relocation without a definition into a warning.
    pub fn with_allow_unresolved_copy(mut self, allow: bool) -> Self {
        self.allow_unresolved_copy = allow;
        self
    }

    /// The initial search list.
    pub fn search_paths(&self) -> Vec<PathBuf> {
        vec![self.default_library_path.clone()]
    }

    #[inline]
    pub fn copy_strategy(&self) -> CopyStrategy {
        self.copy_strategy
    }

    #[inline]
    pub fn strtab_lookup(&self) -> StrTabLookup {
        self.strtab_lookup
    }

    pub(crate) fn copy_miss_policy(&self) -> CopyMissPolicy {
        if self.allow_unresolved_copy {
            CopyMissPolicy::Skip
        } else {
            CopyMissPolicy::Fail
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = LoaderConfig::default();
        assert_eq!(config.search_paths(), vec![PathBuf::from(DEFAULT_LIBRARY_PATH)]);
        assert_eq!(config.copy_strategy(), CopyStrategy::PerSegment);
        assert_eq!(config.copy_miss_policy(), CopyMissPolicy::Fail);
    }

    #[test]
    fn unresolved_copy_is_skipped_when_allowed() {
        let config = LoaderConfig::default().with_allow_unresolved_copy(true);
        assert_eq!(config.copy_miss_policy(), CopyMissPolicy::Skip);
    }
}
