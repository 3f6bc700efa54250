//! # HomeControl Event Engine
//!
//! In-process publish/subscribe bus shared by the kernel and every loaded
//! module. Handlers are registered per event type (or under the
//! [`WILDCARD`] type to see everything) and are scheduled as independent
//! tasks on the host's tokio runtime whenever a matching event is published.
//!
//! - [`types`]: the immutable [`Event`] record and kernel event names.
//! - [`handler`]: the [`EventHandler`] trait and closure helpers.
//! - [`engine`]: the [`EventEngine`] with its handler registry and the
//!   `publish` / `publish_cross_thread` / `gather` dispatch modes.
//! - [`error`]: [`EventSystemError`].
pub mod engine;
pub mod error;
pub mod handler;
pub mod types;

pub use engine::{CrossThreadPending, EventEngine, HandlerRegistry, PendingResult};
pub use error::EventSystemError;
pub use handler::{handler_fn, sync_handler, BoxError, EventHandler, Handler, HandlerFuture, HandlerId, HandlerResult};
pub use types::{event_data, kernel_events, Event, EventData, WILDCARD};
