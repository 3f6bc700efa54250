//! # HomeControl Item Boundary
//!
//! Items are the devices and entities a module contributes. They are owned by
//! an external item registry; the kernel only talks to it through
//! [`ItemManager`] while loading and unloading modules.
pub mod memory;

use std::fmt::Debug;

use async_trait::async_trait;
use thiserror::Error;

use crate::module_system::ModuleDescriptor;

pub use memory::{MemoryItemManager, SpecItem};

#[derive(Debug, Error)]
pub enum ItemError {
    #[error("Item '{identifier}' is already provided by module '{owner}'")]
    DuplicateIdentifier { identifier: String, owner: String },

    #[error("Item '{identifier}' not found")]
    NotFound { identifier: String },

    #[error("Item '{identifier}' was rejected: {message}")]
    Rejected { identifier: String, message: String },
}

/// An entity contributed by a module
pub trait Item: Send + Sync + Debug {
    fn identifier(&self) -> &str;

    fn item_type(&self) -> &str;

    /// Name of the module that contributed this item
    fn module(&self) -> &str;
}

/// Registry the module manager hands items to and takes them back from.
#[async_trait]
pub trait ItemManager: Send + Sync + Debug {
    /// Create every item declared in `module.item_specs` and record their
    /// identifiers in `module.items`. Called after composition, before `init`.
    async fn add_from_module(&self, module: &mut ModuleDescriptor) -> Result<(), ItemError>;

    /// Remove a single item. Called for every identifier in
    /// `ModuleDescriptor::items` while unloading.
    async fn remove_item(&self, identifier: &str) -> Result<(), ItemError>;
}
