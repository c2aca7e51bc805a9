//! Loading a program and its dependencies
//!
//! The [`Loader`] drives four passes, strictly one after the other:
//! resolve every object breadth-first from the root, relocate all of them,
//! apply final page protections, then jump to the root's entry point.

use crate::{
    Error, Result,
    config::LoaderConfig,
    image::ElfImage,
    input::ElfSource,
    mmap::{DefaultMmap, Mmap},
    object::LoadedObject,
    relocation::relocate_all,
};
use hashbrown::HashSet;
use std::{
    collections::VecDeque,
    fmt::Display,
    marker::PhantomData,
    path::{Path, PathBuf},
};

const ORIGIN_TOKENS: [&str; 2] = ["${ORIGIN}", "$ORIGIN"];

/// Replaces the origin token in a run path component with `origin`.
fn expand_origin(entry: &str, origin: &Path) -> PathBuf {
    let origin = origin.to_string_lossy();
    let expanded = ORIGIN_TOKENS
        .iter()
        .fold(entry.to_owned(), |acc, token| acc.replace(token, &origin));
    PathBuf::from(expanded)
}

/// Loads a root object and everything it needs into the current process.
///
/// ```no_run
/// use elf_ld::Loader;
///
/// let mut loader = Loader::new();
/// loader.load_object_and_dependencies("/bin/true").unwrap();
/// loader.apply_relocations().unwrap();
/// loader.adjust_permissions().unwrap();
/// ```
pub struct Loader<M: Mmap = DefaultMmap> {
    config: LoaderConfig,
    search_paths: Vec<PathBuf>,
    objects: Vec<LoadedObject>,
    _marker: PhantomData<M>,
}

impl Loader<DefaultMmap> {
    /// Creates a loader with the default configuration.
    pub fn new() -> Self {
        Self::with_config(LoaderConfig::default())
    }

    pub fn with_config(config: LoaderConfig) -> Self {
        Loader {
            search_paths: config.search_paths(),
            config,
            objects: Vec::new(),
            _marker: PhantomData,
        }
    }
}

impl Default for Loader<DefaultMmap> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Mmap> Loader<M> {
    /// Returns a loader with a custom `Mmap` implementation.
    pub fn with_mmap<NewMmap: Mmap>(self) -> Loader<NewMmap> {
        Loader {
            config: self.config,
            search_paths: self.search_paths,
            objects: self.objects,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Every loaded object, in load order.
    #[inline]
    pub fn objects(&self) -> &[LoadedObject] {
        &self.objects
    }

    /// The current search list: the default directory, then run paths in the
    /// order objects contributed them.
    #[inline]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// The object passed to [`Loader::load_object_and_dependencies`].
    #[inline]
    pub fn root(&self) -> Option<&LoadedObject> {
        self.objects.first()
    }

    /// Finds the file `name` refers to.
    ///
    /// `name` itself is tried first, then `dir/name` for each search
    /// directory in order. The first existing candidate is returned in
    /// canonical form.
    pub fn resolve(&self, name: impl AsRef<Path>) -> Result<PathBuf> {
        let name = name.as_ref();
        let found = std::iter::once(name.to_path_buf())
            .chain(self.search_paths.iter().map(|dir| dir.join(name)))
            .find(|candidate| {
                log::debug!("probing {}", candidate.display());
                candidate.exists()
            })
            .ok_or_else(|| Error::DependencyNotFound {
                name: name.display().to_string(),
            })?;
        Ok(found.canonicalize()?)
    }

    fn load_one(&self, path: PathBuf) -> Result<LoadedObject> {
        let source = ElfSource::from_path_with::<M>(&path)?;
        let image = ElfImage::parse_with(source, &self.config.strtab_lookup)?;
        for note in image.notes() {
            log::warn!("{}: {}", path.display(), note);
        }
        LoadedObject::load_with::<M>(path, image, self.config.copy_strategy)
    }

    /// Loads `root` and, breadth-first, every object reachable through
    /// `DT_NEEDED`.
    ///
    /// Each requested name and each resolved file is loaded at most once, so
    /// shared and cyclic dependencies terminate. Run paths of an object are
    /// appended to the search list before its own dependencies are resolved.
    pub fn load_object_and_dependencies(&mut self, root: impl AsRef<Path>) -> Result<()> {
        let mut queue = VecDeque::from([root.as_ref().to_path_buf()]);
        let mut seen_names: HashSet<PathBuf> = HashSet::new();
        let mut seen_paths: HashSet<PathBuf> = HashSet::new();
        while let Some(name) = queue.pop_front() {
            if !seen_names.insert(name.clone()) {
                continue;
            }
            let path = self.resolve(&name)?;
            if !seen_paths.insert(path.clone()) {
                log::debug!("{} already loaded as {}", name.display(), path.display());
                continue;
            }
            let object = self.load_one(path)?;
            for entry in object.run_paths() {
                let dir = expand_origin(entry, object.origin());
                log::debug!("search path += {}", dir.display());
                self.search_paths.push(dir);
            }
            queue.extend(object.needed().iter().map(PathBuf::from));
            self.objects.push(object);
        }
        log::info!("{self}");
        Ok(())
    }

    /// Relocates every object, in load order.
    pub fn apply_relocations(&mut self) -> Result<()> {
        relocate_all(&mut self.objects, self.config.copy_miss_policy())
    }

    /// Gives every segment of every object its final protection.
    pub fn adjust_permissions(&mut self) -> Result<()> {
        self.objects
            .iter_mut()
            .try_for_each(|object| object.set_final_protections())
    }

    /// Calls the root object's entry point and returns what it returns.
    /// Returns `None` when nothing has been loaded.
    ///
    /// # Safety
    /// The entry point must be a function following the C calling convention
    /// that takes no arguments and returns an `int`, and every object must
    /// already be relocated and protected.
    pub unsafe fn run(&self) -> Option<i32> {
        let root = self.root()?;
        let entry = root.entry_point();
        log::info!("jumping to {:#x} in {}", entry, root.path().display());
        let func: extern "C" fn() -> i32 = unsafe { core::mem::transmute(entry) };
        Some(func())
    }
}

impl<M: Mmap> Display for Loader<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Process {{")?;
        writeln!(f, "  search paths:")?;
        for path in &self.search_paths {
            writeln!(f, "    {}", path.display())?;
        }
        writeln!(f, "  objects:")?;
        for object in &self.objects {
            let hull = object.hull();
            writeln!(
                f,
                "    {} @ {:#x} [{:#x}, {:#x})",
                object.path().display(),
                object.base(),
                hull.low,
                hull.high
            )?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_is_replaced_anywhere_in_the_entry() {
        let origin = Path::new("/x/y");
        assert_eq!(expand_origin("$ORIGIN/sub", origin), PathBuf::from("/x/y/sub"));
        assert_eq!(expand_origin("${ORIGIN}", origin), PathBuf::from("/x/y"));
        assert_eq!(expand_origin("/usr/lib", origin), PathBuf::from("/usr/lib"));
        assert_eq!(expand_origin("", origin), PathBuf::from(""));
    }

    #[test]
    fn search_list_starts_with_default_directory() {
        let loader = Loader::with_config(LoaderConfig::default().with_default_library_path("/opt"));
        assert_eq!(loader.search_paths(), &[PathBuf::from("/opt")]);
        assert!(loader.root().is_none());
        assert!(unsafe { loader.run() }.is_none());
    }

    #[test]
    fn missing_file_is_reported_by_name() {
        let loader = Loader::with_config(
            LoaderConfig::default().with_default_library_path("/nonexistent-elf-ld"),
        );
        let err = loader.resolve("libmissing.so").unwrap_err();
        assert!(matches!(err, Error::DependencyNotFound { name } if name == "libmissing.so"));
    }
}
