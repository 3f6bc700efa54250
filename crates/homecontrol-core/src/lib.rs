//! # HomeControl Core
//!
//! The plugin runtime kernel of the HomeControl hub. Modules ("plugins") are
//! discovered and driven through their lifecycle by the
//! [`ModuleManager`](module_system::ModuleManager) and talk to each other only
//! through the [`EventEngine`](event::EventEngine).
pub mod config;
pub mod event;
pub mod item;
pub mod kernel;
pub mod module_system;
pub mod tick;

// Re-export the types hosts and modules touch most often
pub use config::HostConfig;
pub use event::{Event, EventData, EventEngine, Handler, HandlerId};
pub use item::{Item, ItemManager, MemoryItemManager};
pub use kernel::Application;
pub use kernel::error::Error as KernelError;
pub use module_system::{Module, ModuleCatalog, ModuleCode, ModuleContext, ModuleManager, ModuleSpec};
pub use tick::TickEngine;
