use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::module_system::error::ModuleError;
use crate::module_system::traits::ModuleCode;

/// Everything a [`CodeLoader`] gets to resolve a module's code
#[derive(Debug, Clone, Copy)]
pub struct LoadRequest<'a> {
    pub name: &'a str,
    /// The entry-point file found on disk
    pub entry_point: &'a Path,
    /// Directories code may be resolved from, most recent last. A folder
    /// module's own directory is on this path only while it loads.
    pub search_path: &'a [PathBuf],
}

/// Turns an entry point into loaded module code.
pub trait CodeLoader: Send + Sync + fmt::Debug {
    fn load(&self, request: &LoadRequest<'_>) -> Result<Box<dyn ModuleCode>, ModuleError>;
}

/// Factory producing a fresh [`ModuleCode`] value
pub type CodeFactory = Arc<dyn Fn() -> Box<dyn ModuleCode> + Send + Sync>;

/// Statically linked module code, keyed by module name.
///
/// The entry-point file still has to exist on disk; it marks where the
/// module lives while the code itself is compiled into the host.
#[derive(Clone, Default)]
pub struct ModuleCatalog {
    factories: BTreeMap<String, CodeFactory>,
}

impl fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleCatalog")
            .field("modules", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register code for module `name`, replacing any earlier registration
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn ModuleCode> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    /// Builder form of [`register`](Self::register)
    pub fn with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn ModuleCode> + Send + Sync + 'static,
    {
        self.register(name, factory);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Instantiate code for `name` without checking the filesystem
    pub fn create(&self, name: &str) -> Option<Box<dyn ModuleCode>> {
        self.factories.get(name).map(|factory| factory())
    }
}

impl CodeLoader for ModuleCatalog {
    fn load(&self, request: &LoadRequest<'_>) -> Result<Box<dyn ModuleCode>, ModuleError> {
        let not_found = || ModuleError::CodeNotFound {
            name: request.name.to_string(),
            entry_point: request.entry_point.to_path_buf(),
        };
        if !request.entry_point.is_file() {
            return Err(not_found());
        }
        log::trace!(
            "Resolving code for '{}' (search path: {:?})",
            request.name,
            request.search_path
        );
        self.create(request.name).ok_or_else(not_found)
    }
}
