use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::module_system::error::ModuleError;
use crate::module_system::spec::{ItemSpec, ModuleMeta, ModuleSpec};
use crate::module_system::traits::Module;

/// How a module was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    /// A single entry-point file
    File,
    /// A directory with an entry point and a spec file
    Folder,
    /// Code registered directly with the manager
    Builtin,
}

/// Per-module lifecycle state.
///
/// ```text
/// Discovered -> DependenciesResolving -> CodeLoaded -> Composed
///            -> Initialized -> Running -> Stopping -> Unloaded
/// ```
/// `LoadFailed` is reachable from every state before `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    Discovered,
    DependenciesResolving,
    CodeLoaded,
    Composed,
    Initialized,
    Running,
    Stopping,
    Unloaded,
    LoadFailed,
}

impl ModuleState {
    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(self, next: ModuleState) -> bool {
        use ModuleState::*;
        match (self, next) {
            (Discovered, DependenciesResolving | CodeLoaded)
            | (DependenciesResolving, CodeLoaded)
            | (CodeLoaded, Composed)
            | (Composed, Initialized)
            | (Initialized, Running)
            | (Running, Stopping)
            | (Stopping, Unloaded | Running) => true,
            (Discovered | DependenciesResolving | CodeLoaded | Composed | Initialized, LoadFailed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The kernel's record of a loaded module
#[derive(Clone)]
pub struct ModuleDescriptor {
    pub name: String,
    /// Origin on disk; `None` for builtin modules
    pub path: Option<PathBuf>,
    pub kind: ModuleKind,
    pub meta: ModuleMeta,
    pub spec: ModuleSpec,
    /// Identifiers of items contributed through the item manager
    pub items: Vec<String>,
    pub item_specs: Vec<ItemSpec>,
    pub module: Arc<dyn Module>,
    pub state: ModuleState,
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("items", &self.items)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ModuleDescriptor {
    pub fn new(
        name: impl Into<String>,
        path: Option<PathBuf>,
        kind: ModuleKind,
        spec: ModuleSpec,
        module: Arc<dyn Module>,
    ) -> Self {
        Self {
            name: name.into(),
            path,
            kind,
            meta: spec.meta.clone(),
            item_specs: spec.items.clone(),
            spec,
            items: Vec::new(),
            module,
            state: ModuleState::Composed,
        }
    }

    /// Move to `next`, logging transitions the lifecycle does not allow
    pub fn transition(&mut self, next: ModuleState) {
        if !self.state.can_transition_to(next) {
            log::warn!(
                "Module '{}' moved from {} to {} outside the normal lifecycle",
                self.name,
                self.state,
                next
            );
        }
        self.state = next;
    }

    pub fn summary(&self) -> ModuleSummary {
        ModuleSummary {
            name: self.name.clone(),
            path: self.path.clone(),
            kind: self.kind,
            meta: self.meta.clone(),
            items: self.items.clone(),
            state: self.state,
        }
    }
}

/// Serializable snapshot of a descriptor, used in `module_loaded` events and
/// as the success value of a load
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleSummary {
    pub name: String,
    pub path: Option<PathBuf>,
    pub kind: ModuleKind,
    pub meta: ModuleMeta,
    pub items: Vec<String>,
    pub state: ModuleState,
}

/// A load that did not produce a running module
#[derive(Debug)]
pub struct LoadFailure {
    pub name: String,
    pub path: Option<PathBuf>,
    /// Last state reached before the failure
    pub stage: ModuleState,
    pub error: ModuleError,
}

impl fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (after {})", self.error, self.stage)
    }
}

impl std::error::Error for LoadFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

pub type LoadOutcome = Result<ModuleSummary, LoadFailure>;
