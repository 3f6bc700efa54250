//! # HomeControl Kernel
//!
//! Bootstrapping and lifecycle of the long-lived kernel components.
//!
//! - [`Application`](bootstrap::Application) owns the
//!   [`EventEngine`](crate::event::EventEngine), the
//!   [`TickEngine`](crate::tick::TickEngine) and the
//!   [`ModuleManager`](crate::module_system::ModuleManager), initializes and
//!   starts them in that order and stops them in reverse.
//! - [`KernelComponent`](component::KernelComponent) is the lifecycle trait
//!   those components implement.
//! - `constants` holds application-wide names and defaults.
//! - `error` aggregates every subsystem error into [`Error`](error::Error).
pub mod bootstrap;
pub mod component;
pub mod constants;
pub mod error;

pub use bootstrap::Application;
pub use component::KernelComponent;
pub use error::{Error, Result};
