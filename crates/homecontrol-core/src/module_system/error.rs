//! # HomeControl Module System Errors
//!
//! [`ModuleError`] is returned by every fallible module-manager operation.
//! Load-time variants are also what `module_not_loaded` events carry in their
//! `exception` field (rendered with `Display`).
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::item::ItemError;
use crate::module_system::requirement::RequirementError;

/// Lifecycle hook that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Init,
    Start,
    Stop,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecyclePhase::Init => write!(f, "init"),
            LifecyclePhase::Start => write!(f, "start"),
            LifecyclePhase::Stop => write!(f, "stop"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Module '{name}' at {path} is malformed: missing {missing}")]
    StructureInvalid {
        name: String,
        path: PathBuf,
        missing: String,
    },

    #[error("Installing dependencies for module '{name}' ({}) exited with status {status}", requirements.join(", "))]
    DependencyInstallFailed {
        name: String,
        requirements: Vec<String>,
        status: i32,
    },

    #[error("Module '{name}' is not loaded")]
    NotFound { name: String },

    #[error("Failed to remove items of module '{name}': {}", failures.join("; "))]
    ItemRemovalFailed { name: String, failures: Vec<String> },

    #[error("A module named '{name}' is already loaded")]
    AlreadyLoaded { name: String },

    #[error("Invalid spec for module '{name}': {message}")]
    SpecInvalid { name: String, message: String },

    #[error("Invalid requirement in module '{name}': {source}")]
    RequirementInvalid {
        name: String,
        #[source]
        source: RequirementError,
    },

    #[error("No code found for module '{name}' at {}", entry_point.display())]
    CodeNotFound { name: String, entry_point: PathBuf },

    #[error("Module '{name}' failed during {phase}: {source}")]
    LifecycleFailed {
        name: String,
        phase: LifecyclePhase,
        #[source]
        source: Box<crate::kernel::error::Error>,
    },

    #[error("Items of module '{name}' could not be added: {source}")]
    ItemsRejected {
        name: String,
        #[source]
        source: ItemError,
    },

    #[error("Failed to list installed packages: {message}")]
    PackageListFailed { message: String },

    #[error("Failed to run package manager '{program}': {message}")]
    PackageCommandFailed { program: String, message: String },

    #[error("Modules failed to shut down cleanly: {}", failed.join(", "))]
    ShutdownIncomplete { failed: Vec<String> },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ModuleError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ModuleError::Io {
            path: path.into(),
            source,
        }
    }
}
