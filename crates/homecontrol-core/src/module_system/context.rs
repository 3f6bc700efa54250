use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::event::{CrossThreadPending, EventData, EventEngine, EventSystemError, Handler, HandlerId, PendingResult};
use crate::module_system::spec::ModuleSpec;
use crate::tick::{TickCallback, TickEngine, TickError, TickId};

/// Capabilities handed to a module's lifecycle hooks.
///
/// Every subscription and tick made through the context is recorded, and the
/// module manager revokes whatever is left after the module's `stop` hook.
pub struct ModuleContext {
    name: String,
    spec: ModuleSpec,
    events: Arc<EventEngine>,
    ticks: Arc<TickEngine>,
    subscriptions: Mutex<Vec<HandlerId>>,
    tick_ids: Mutex<Vec<TickId>>,
}

impl fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContext")
            .field("name", &self.name)
            .field("subscriptions", &self.subscription_count())
            .field("ticks", &self.tick_count())
            .finish_non_exhaustive()
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ModuleContext {
    pub fn new(name: impl Into<String>, spec: ModuleSpec, events: Arc<EventEngine>, ticks: Arc<TickEngine>) -> Self {
        Self {
            name: name.into(),
            spec,
            events,
            ticks,
            subscriptions: Mutex::new(Vec::new()),
            tick_ids: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The module's spec document
    pub fn config(&self) -> &ModuleSpec {
        &self.spec
    }

    pub fn setting<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.spec.setting(key)
    }

    pub fn events(&self) -> &Arc<EventEngine> {
        &self.events
    }

    /// Subscribe `handler`. Other modules holding the same handler keep
    /// their subscription when this one is dropped.
    pub fn register(&self, event_type: &str, handler: Handler) -> HandlerId {
        let id = self.events.claim(event_type, handler);
        let mut subscriptions = locked(&self.subscriptions);
        if subscriptions.contains(&id) {
            // One claim per context
            self.events.release(id);
        } else {
            subscriptions.push(id);
        }
        id
    }

    /// Drop a subscription made through this context
    pub fn unregister(&self, id: HandlerId) -> bool {
        let held = {
            let mut subscriptions = locked(&self.subscriptions);
            let before = subscriptions.len();
            subscriptions.retain(|s| *s != id);
            subscriptions.len() < before
        };
        held && self.events.release(id)
    }

    pub fn publish(&self, event_type: &str, data: EventData, kwargs: EventData) -> Vec<PendingResult> {
        self.events.publish(event_type, data, kwargs)
    }

    pub fn publish_cross_thread(&self, event_type: &str, data: EventData, kwargs: EventData) -> Vec<CrossThreadPending> {
        self.events.publish_cross_thread(event_type, data, kwargs)
    }

    pub async fn gather(
        &self,
        event_type: &str,
        data: EventData,
        kwargs: EventData,
    ) -> Result<Vec<Value>, EventSystemError> {
        self.events.gather(event_type, data, kwargs).await
    }

    pub fn tick(&self, interval: Duration, callback: TickCallback) -> Result<TickId, TickError> {
        let id = self.ticks.tick(interval, callback)?;
        locked(&self.tick_ids).push(id);
        Ok(id)
    }

    pub fn cancel_tick(&self, id: TickId) -> bool {
        locked(&self.tick_ids).retain(|t| *t != id);
        self.ticks.cancel(id)
    }

    pub fn subscription_count(&self) -> usize {
        locked(&self.subscriptions).len()
    }

    pub fn tick_count(&self) -> usize {
        locked(&self.tick_ids).len()
    }

    /// Drop every subscription and tick still held; returns how many of each
    pub(crate) fn revoke(&self) -> (usize, usize) {
        let subscriptions: Vec<_> = locked(&self.subscriptions).drain(..).collect();
        let removed = subscriptions
            .into_iter()
            .filter(|id| self.events.release(*id))
            .count();
        let tick_ids: Vec<_> = locked(&self.tick_ids).drain(..).collect();
        let cancelled = tick_ids.into_iter().filter(|id| self.ticks.cancel(*id)).count();
        (removed, cancelled)
    }
}
