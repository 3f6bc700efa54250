use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::kernel::error::Result;
use crate::module_system::context::ModuleContext;
use crate::module_system::spec::ModuleSpec;

/// Lifecycle contract every loaded module is driven through.
///
/// All hooks have no-op defaults, so a module only implements what it needs.
/// Hooks take `&self`; modules keep mutable state behind their own locks.
#[async_trait]
pub trait Module: Send + Sync {
    /// Called once after the module's items were added
    async fn init(&self, ctx: &ModuleContext) -> Result<()> {
        log::trace!("Module '{}' has no init hook", ctx.name());
        Ok(())
    }

    /// Called right after a successful `init`
    async fn start(&self, ctx: &ModuleContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Called while unloading, after the module's items were removed
    async fn stop(&self, ctx: &ModuleContext) -> Result<()> {
        log::trace!("Module '{}' has no stop hook", ctx.name());
        Ok(())
    }
}

/// The base behavior for modules that ship no code of their own
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericModule;

impl Module for GenericModule {}

/// Combine a module's optional custom behavior with the generic contract.
///
/// Hooks the custom behavior does not override fall back to the trait
/// defaults; without custom behavior the result is a [`GenericModule`].
pub fn compose(custom: Option<Box<dyn Module>>) -> Arc<dyn Module> {
    match custom {
        Some(custom) => Arc::from(custom),
        None => Arc::new(GenericModule),
    }
}

/// Where a module's spec comes from when it is not a folder module
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SpecSource {
    /// No spec: empty meta, no items, no requirements
    #[default]
    None,
    /// A spec value embedded in the code
    Inline(ModuleSpec),
    /// YAML text embedded in the code
    Text(String),
    /// A spec file; relative paths are resolved against the module's location
    File(PathBuf),
}

/// What a module's code exposes to the loader
pub trait ModuleCode: Send + Sync {
    /// Custom lifecycle behavior, if the module has any
    fn behavior(&self) -> Option<Box<dyn Module>>;

    fn spec_source(&self) -> SpecSource {
        SpecSource::None
    }
}
