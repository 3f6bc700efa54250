use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};

use crate::event::handler::same_handler;
use crate::event::{Event, EventData, EventSystemError, Handler, HandlerId, HandlerResult, WILDCARD};
use crate::kernel::component::KernelComponent;
use crate::kernel::error::Result as KernelResult;

//--------------------------------------------------
// HandlerRegistry
//--------------------------------------------------

/// Subscriptions grouped by event type, in registration order.
///
/// Empty groups are dropped so [`event_types`](HandlerRegistry::event_types)
/// only reports types somebody is listening to.
///
/// A subscription is held directly (through [`register`](Self::register)) or
/// by claims (through [`claim`](Self::claim)). Claims are counted, so two
/// owners claiming the same handler share one subscription and it stays
/// until both have released it.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Vec<(HandlerId, Handler)>>,
    subscriptions: HashMap<HandlerId, Subscription>,
    next_handler_id: u64,
}

struct Subscription {
    event_type: String,
    claims: usize,
    direct: bool,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("event_types", &self.handlers.len())
            .field("handlers", &self.subscriptions.len())
            .field("next_handler_id", &self.next_handler_id)
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event_type`.
    ///
    /// Registering a handler that is already subscribed to the same type
    /// returns the existing id and leaves the registry unchanged.
    pub fn register(&mut self, event_type: &str, handler: Handler) -> HandlerId {
        let id = self.insert(event_type, handler);
        if let Some(subscription) = self.subscriptions.get_mut(&id) {
            subscription.direct = true;
        }
        id
    }

    /// Register `handler` like [`register`](Self::register) and take one
    /// claim on the subscription
    pub fn claim(&mut self, event_type: &str, handler: Handler) -> HandlerId {
        let id = self.insert(event_type, handler);
        if let Some(subscription) = self.subscriptions.get_mut(&id) {
            subscription.claims += 1;
        }
        id
    }

    /// Give back one claim. The subscription goes away with its last claim
    /// unless it was also registered directly. Returns whether a claim was held.
    pub fn release(&mut self, id: HandlerId) -> bool {
        let Some(subscription) = self.subscriptions.get_mut(&id) else {
            return false;
        };
        if subscription.claims == 0 {
            return false;
        }
        subscription.claims -= 1;
        if subscription.claims == 0 && !subscription.direct {
            self.unregister(id);
        }
        true
    }

    fn insert(&mut self, event_type: &str, handler: Handler) -> HandlerId {
        let group = self.handlers.entry(event_type.to_string()).or_default();
        if let Some((id, _)) = group.iter().find(|(_, h)| same_handler(h, &handler)) {
            return *id;
        }
        self.next_handler_id += 1;
        let id = HandlerId(self.next_handler_id);
        group.push((id, handler));
        self.subscriptions.insert(
            id,
            Subscription {
                event_type: event_type.to_string(),
                claims: 0,
                direct: false,
            },
        );
        id
    }

    /// Remove the subscription `id` outright, whoever holds it
    pub fn unregister(&mut self, id: HandlerId) -> bool {
        let Some(subscription) = self.subscriptions.remove(&id) else {
            return false;
        };
        if let Some(group) = self.handlers.get_mut(&subscription.event_type) {
            group.retain(|(h_id, _)| *h_id != id);
            if group.is_empty() {
                self.handlers.remove(&subscription.event_type);
            }
        }
        true
    }

    /// Remove `handler` from `event_type`. Unknown pairs are ignored.
    pub fn unregister_handler(&mut self, event_type: &str, handler: &Handler) -> bool {
        let id = self
            .handlers
            .get(event_type)
            .and_then(|group| group.iter().find(|(_, h)| same_handler(h, handler)))
            .map(|(id, _)| *id);
        id.is_some_and(|id| self.unregister(id))
    }

    /// Handlers an event of `event_type` is delivered to: wildcard handlers
    /// first, then the type's own handlers.
    pub fn handlers_for(&self, event_type: &str) -> Vec<(HandlerId, Handler)> {
        let mut matched: Vec<(HandlerId, Handler)> = self
            .handlers
            .get(WILDCARD)
            .map(|group| group.to_vec())
            .unwrap_or_default();
        if event_type != WILDCARD {
            if let Some(group) = self.handlers.get(event_type) {
                matched.extend(group.iter().cloned());
            }
        }
        matched
    }

    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers.get(event_type).map_or(0, Vec::len)
    }

    pub fn event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
        self.subscriptions.clear();
    }
}

//--------------------------------------------------
// Pending handler results
//--------------------------------------------------

/// Handle to one handler invocation scheduled by [`EventEngine::publish`]
pub struct PendingResult {
    handler_id: HandlerId,
    event_type: String,
    join: JoinHandle<HandlerResult>,
}

impl fmt::Debug for PendingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResult")
            .field("handler_id", &self.handler_id)
            .field("event_type", &self.event_type)
            .field("finished", &self.join.is_finished())
            .finish()
    }
}

impl PendingResult {
    pub fn handler_id(&self) -> HandlerId {
        self.handler_id
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the handler to finish and return its value
    pub async fn wait(self) -> Result<Value, EventSystemError> {
        match self.join.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(EventSystemError::HandlerFailed {
                event_type: self.event_type,
                handler_id: self.handler_id,
                source,
            }),
            Err(join_error) => Err(EventSystemError::HandlerPanicked {
                event_type: self.event_type,
                handler_id: self.handler_id,
                reason: join_failure_reason(&join_error),
            }),
        }
    }
}

fn join_failure_reason(error: &JoinError) -> String {
    if error.is_cancelled() {
        "task was cancelled".to_string()
    } else {
        "task panicked".to_string()
    }
}

/// Handle to one handler invocation scheduled by
/// [`EventEngine::publish_cross_thread`].
///
/// Usable both from async code ([`wait`](Self::wait)) and from plain threads
/// outside the runtime ([`blocking_wait`](Self::blocking_wait)).
pub struct CrossThreadPending {
    handler_id: HandlerId,
    event_type: String,
    receiver: oneshot::Receiver<HandlerResult>,
}

impl fmt::Debug for CrossThreadPending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrossThreadPending")
            .field("handler_id", &self.handler_id)
            .field("event_type", &self.event_type)
            .finish_non_exhaustive()
    }
}

impl CrossThreadPending {
    pub fn handler_id(&self) -> HandlerId {
        self.handler_id
    }

    pub async fn wait(self) -> Result<Value, EventSystemError> {
        let outcome = self.receiver.await;
        Self::into_result(self.event_type, self.handler_id, outcome)
    }

    /// Block the current thread until the handler finishes.
    ///
    /// Must not be called from inside an async context.
    pub fn blocking_wait(self) -> Result<Value, EventSystemError> {
        let outcome = self.receiver.blocking_recv();
        Self::into_result(self.event_type, self.handler_id, outcome)
    }

    fn into_result(
        event_type: String,
        handler_id: HandlerId,
        outcome: std::result::Result<HandlerResult, oneshot::error::RecvError>,
    ) -> Result<Value, EventSystemError> {
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(EventSystemError::HandlerFailed {
                event_type,
                handler_id,
                source,
            }),
            // The sender only disappears without a value when the task unwound
            Err(_) => Err(EventSystemError::HandlerPanicked {
                event_type,
                handler_id,
                reason: "handler task ended without a result".to_string(),
            }),
        }
    }
}

//--------------------------------------------------
// EventEngine
//--------------------------------------------------

/// The process-wide event bus.
///
/// The registry sits behind a synchronous lock that is never held across an
/// await point; handlers run as separate tasks on the runtime the engine was
/// built with.
pub struct EventEngine {
    registry: RwLock<HandlerRegistry>,
    runtime: Handle,
}

impl fmt::Debug for EventEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEngine")
            .field("registry", &*self.read_registry())
            .finish_non_exhaustive()
    }
}

impl EventEngine {
    pub fn new(runtime: Handle) -> Self {
        Self {
            registry: RwLock::new(HandlerRegistry::new()),
            runtime,
        }
    }

    /// Build an engine bound to the runtime the caller is running on
    pub fn try_current() -> Result<Self, EventSystemError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| EventSystemError::NoRuntime)
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    fn read_registry(&self) -> RwLockReadGuard<'_, HandlerRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_registry(&self) -> RwLockWriteGuard<'_, HandlerRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self, event_type: impl AsRef<str>, handler: Handler) -> HandlerId {
        let event_type = event_type.as_ref();
        let id = self.write_registry().register(event_type, handler);
        log::trace!("Subscribed {} to '{}'", id, event_type);
        id
    }

    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        self.write_registry().unregister(id)
    }

    /// Subscribe on behalf of an owner that will [`release`](Self::release)
    /// the subscription later
    pub fn claim(&self, event_type: &str, handler: Handler) -> HandlerId {
        let id = self.write_registry().claim(event_type, handler);
        log::trace!("Claimed {} on '{}'", id, event_type);
        id
    }

    pub fn release(&self, id: HandlerId) -> bool {
        self.write_registry().release(id)
    }

    pub fn unsubscribe_handler(&self, event_type: &str, handler: &Handler) -> bool {
        self.write_registry().unregister_handler(event_type, handler)
    }

    pub fn handler_count(&self, event_type: &str) -> usize {
        self.read_registry().handler_count(event_type)
    }

    pub fn event_types(&self) -> Vec<String> {
        self.read_registry().event_types()
    }

    /// Drop every subscription
    pub fn clear(&self) {
        self.write_registry().clear();
    }

    fn matching(&self, event_type: &str, data: EventData, kwargs: EventData) -> (Arc<Event>, Vec<(HandlerId, Handler)>) {
        let event = Arc::new(Event::new(event_type, data, kwargs));
        let handlers = self.read_registry().handlers_for(event_type);
        log::debug!("Publishing {} to {} handler(s)", event, handlers.len());
        (event, handlers)
    }

    /// Schedule every matching handler on the runtime and return immediately.
    ///
    /// The returned handles may be awaited or simply dropped; dropping one
    /// does not cancel its handler.
    pub fn publish(&self, event_type: &str, data: EventData, kwargs: EventData) -> Vec<PendingResult> {
        let (event, handlers) = self.matching(event_type, data, kwargs);
        handlers
            .into_iter()
            .map(|(handler_id, handler)| {
                let event = Arc::clone(&event);
                let join = self.runtime.spawn(async move {
                    let result = handler.handle(event).await;
                    if let Err(e) = &result {
                        log::debug!("{} failed: {}", handler_id, e);
                    }
                    result
                });
                PendingResult {
                    handler_id,
                    event_type: event_type.to_string(),
                    join,
                }
            })
            .collect()
    }

    /// Like [`publish`](Self::publish), but callable from threads that are not
    /// part of the runtime.
    pub fn publish_cross_thread(
        &self,
        event_type: &str,
        data: EventData,
        kwargs: EventData,
    ) -> Vec<CrossThreadPending> {
        let (event, handlers) = self.matching(event_type, data, kwargs);
        handlers
            .into_iter()
            .map(|(handler_id, handler)| {
                let event = Arc::clone(&event);
                let (sender, receiver) = oneshot::channel();
                self.runtime.spawn(async move {
                    let result = handler.handle(event).await;
                    // Receiver may have been dropped; nobody is waiting then
                    let _ = sender.send(result);
                });
                CrossThreadPending {
                    handler_id,
                    event_type: event_type.to_string(),
                    receiver,
                }
            })
            .collect()
    }

    /// Publish and wait for every matching handler.
    ///
    /// Values come back in dispatch order. All handlers run to completion
    /// before the first failure (if any) is returned.
    pub async fn gather(
        &self,
        event_type: &str,
        data: EventData,
        kwargs: EventData,
    ) -> Result<Vec<Value>, EventSystemError> {
        let pending = self.publish(event_type, data, kwargs);
        join_all(pending.into_iter().map(PendingResult::wait))
            .await
            .into_iter()
            .collect()
    }
}

#[async_trait]
impl KernelComponent for EventEngine {
    fn name(&self) -> &'static str {
        "EventEngine"
    }

    async fn initialize(&self) -> KernelResult<()> {
        log::debug!("Event engine ready");
        Ok(())
    }

    async fn start(&self) -> KernelResult<()> {
        Ok(())
    }

    async fn stop(&self) -> KernelResult<()> {
        let remaining = self.event_types();
        if !remaining.is_empty() {
            log::debug!("Dropping remaining subscriptions for {:?}", remaining);
        }
        self.clear();
        Ok(())
    }
}
