//! # HomeControl Kernel Errors
//!
//! Defines the kernel-wide [`Error`] type. Every subsystem keeps its own typed
//! error enum ([`EventSystemError`], [`ModuleError`], [`ItemError`],
//! [`TickError`], [`ConfigError`]); this module aggregates them so host code
//! can use a single [`Result`] alias.
use std::result::Result as StdResult;

use thiserror::Error as ThisError;

use crate::config::ConfigError;
use crate::event::error::EventSystemError;
use crate::item::ItemError;
use crate::module_system::error::ModuleError;
use crate::tick::TickError;

/// Kernel error type
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Event system error: {0}")]
    EventSystem(#[from] EventSystemError),

    #[error("Module system error: {0}")]
    ModuleSystem(#[from] ModuleError),

    #[error("Item manager error: {0}")]
    Item(#[from] ItemError),

    #[error("Tick engine error: {0}")]
    Tick(#[from] TickError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Error occurring during a specific kernel lifecycle phase.
    #[error("Kernel lifecycle error during {phase}: {message}")]
    KernelLifecycleError {
        phase: KernelLifecyclePhase,
        component_name: Option<String>,
        message: String,
        #[source]
        source: Option<Box<Error>>,
    },

    /// Generic error with message
    #[error("Error: {0}")]
    Other(String),
}

/// Represents a specific phase in the kernel's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum KernelLifecyclePhase {
    #[error("Initialize")]
    Initialize,
    #[error("Start")]
    Start,
    #[error("Shutdown")]
    Shutdown,
}

/// Shorthand for Result with our Error type
pub type Result<T> = StdResult<T, Error>;

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}
