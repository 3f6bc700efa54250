//! # HomeControl Module System
//!
//! Everything needed to turn modules on disk (or compiled into the host) into
//! running modules and back:
//!
//! - [`ModuleManager`]: discovery, dependency installation, loading,
//!   composition, lifecycle and unloading.
//! - [`Module`] / [`ModuleCode`]: the lifecycle contract and what module code
//!   exposes to the loader.
//! - [`CodeLoader`] / [`ModuleCatalog`]: resolving an entry point to code.
//! - [`ModuleSpec`] / [`Requirement`]: the declarative spec document and its
//!   `pip-requirements`.
//! - [`PackageManager`]: the external installer boundary.
//! - [`ModuleContext`]: capabilities (events, ticks, config) handed to hooks.
pub mod context;
pub mod descriptor;
pub mod error;
pub mod loader;
pub mod manager;
pub mod packages;
pub mod requirement;
pub mod spec;
pub mod traits;

pub use context::ModuleContext;
pub use descriptor::{LoadFailure, LoadOutcome, ModuleDescriptor, ModuleKind, ModuleState, ModuleSummary};
pub use error::{LifecyclePhase, ModuleError};
pub use loader::{CodeFactory, CodeLoader, LoadRequest, ModuleCatalog};
pub use manager::ModuleManager;
pub use packages::{CommandPackageManager, PackageManager};
pub use requirement::{InstalledPackages, PackageVersion, Requirement, RequirementError, VersionConstraint};
pub use spec::{ItemSpec, ModuleMeta, ModuleSpec};
pub use traits::{compose, GenericModule, Module, ModuleCode, SpecSource};
