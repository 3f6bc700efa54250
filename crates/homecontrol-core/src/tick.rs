//! # HomeControl Tick Engine
//!
//! Periodic callbacks for modules. Each registration runs as its own tokio
//! task that fires every `interval` (the first call happens one interval
//! after registration) until it is cancelled.
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::kernel::component::KernelComponent;
use crate::kernel::error::Result as KernelResult;

#[derive(Debug, Error)]
pub enum TickError {
    #[error("Tick interval must be greater than zero")]
    InvalidInterval,
}

/// Token identifying one periodic registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TickId(u64);

impl fmt::Display for TickId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tick#{}", self.0)
    }
}

/// Callback invoked on every tick
pub type TickCallback = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure into a [`TickCallback`]
pub fn tick_fn<F, Fut>(f: F) -> TickCallback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::new(move || Box::pin(f()))
}

pub struct TickEngine {
    runtime: Handle,
    tasks: Mutex<HashMap<TickId, JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl fmt::Debug for TickEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickEngine")
            .field("active", &self.active())
            .finish_non_exhaustive()
    }
}

impl TickEngine {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<TickId, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Call `callback` every `interval` until cancelled
    pub fn tick(&self, interval: Duration, callback: TickCallback) -> Result<TickId, TickError> {
        if interval.is_zero() {
            return Err(TickError::InvalidInterval);
        }
        let id = TickId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = self.runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                callback().await;
            }
        });
        self.tasks().insert(id, handle);
        log::trace!("Registered {} every {:?}", id, interval);
        Ok(id)
    }

    /// Stop a registration. Returns `false` for unknown or already-cancelled ids.
    pub fn cancel(&self, id: TickId) -> bool {
        match self.tasks().remove(&id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.tasks().drain().collect();
        for (_, handle) in &drained {
            handle.abort();
        }
        drained.len()
    }

    /// Number of live registrations
    pub fn active(&self) -> usize {
        self.tasks().len()
    }
}

#[async_trait]
impl KernelComponent for TickEngine {
    fn name(&self) -> &'static str {
        "TickEngine"
    }

    async fn initialize(&self) -> KernelResult<()> {
        Ok(())
    }

    async fn start(&self) -> KernelResult<()> {
        Ok(())
    }

    async fn stop(&self) -> KernelResult<()> {
        let cancelled = self.cancel_all();
        if cancelled > 0 {
            log::debug!("Cancelled {} periodic task(s) left running at shutdown", cancelled);
        }
        Ok(())
    }
}
