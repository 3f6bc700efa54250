use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::event::Event;

/// Error type handlers may fail with
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// What a handler produces; `gather` collects the `Ok` values
pub type HandlerResult = Result<Value, BoxError>;

/// Owned future returned by [`EventHandler::handle`]
pub type HandlerFuture = BoxFuture<'static, HandlerResult>;

/// Asynchronous event handler.
///
/// Implemented for every `Fn(Arc<Event>) -> impl Future<Output = HandlerResult>`
/// closure, so most handlers are plain async closures wrapped with
/// [`handler_fn`].
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: Arc<Event>) -> HandlerFuture;
}

impl<F, Fut> EventHandler for F
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn handle(&self, event: Arc<Event>) -> HandlerFuture {
        Box::pin(self(event))
    }
}

/// Shared handler. Identity is the allocation: subscribing the same `Handler`
/// twice to one event type is a no-op.
pub type Handler = Arc<dyn EventHandler>;

/// Token identifying one subscription in an [`EventEngine`](crate::event::EventEngine)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub(crate) u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler#{}", self.0)
    }
}

/// Wrap an async closure into a [`Handler`]
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(f)
}

/// Helper function to create handlers from synchronous closures
pub fn sync_handler<F>(f: F) -> Handler
where
    F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(move |event: Arc<Event>| {
        let result = f(&event);
        async move { result }
    })
}

/// Compare handlers by allocation, ignoring vtable metadata
pub(crate) fn same_handler(a: &Handler, b: &Handler) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
