//! Example module publishing a `heartbeat` event at a fixed interval.
//!
//! Other modules can ask how many beats were sent by gathering
//! `heartbeat_query`. The interval comes from the `interval-ms` setting.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use homecontrol_core::event::{event_data, sync_handler, EventData};
use homecontrol_core::kernel::Result as KernelResult;
use homecontrol_core::module_system::{Module, ModuleCode, ModuleContext, SpecSource};
use homecontrol_core::tick::tick_fn;

pub const MODULE_NAME: &str = "heartbeat";
pub const HEARTBEAT_EVENT: &str = "heartbeat";
pub const HEARTBEAT_QUERY: &str = "heartbeat_query";
pub const DEFAULT_INTERVAL_MS: u64 = 1000;

const DEFAULT_SPEC: &str = "\
meta:
  name: Heartbeat
  description: Publishes a heartbeat event periodically
interval-ms: 1000
";

/// Code of the heartbeat module
#[derive(Debug, Default, Clone, Copy)]
pub struct Heartbeat;

impl ModuleCode for Heartbeat {
    fn behavior(&self) -> Option<Box<dyn Module>> {
        Some(Box::new(HeartbeatModule::default()))
    }

    fn spec_source(&self) -> SpecSource {
        SpecSource::Text(DEFAULT_SPEC.to_string())
    }
}

#[derive(Debug, Default)]
struct HeartbeatModule {
    beats: Arc<AtomicU64>,
}

#[async_trait]
impl Module for HeartbeatModule {
    async fn init(&self, ctx: &ModuleContext) -> KernelResult<()> {
        let beats = Arc::clone(&self.beats);
        ctx.register(
            HEARTBEAT_QUERY,
            sync_handler(move |_| Ok(json!({ "count": beats.load(Ordering::SeqCst) }))),
        );
        Ok(())
    }

    async fn start(&self, ctx: &ModuleContext) -> KernelResult<()> {
        let interval_ms = ctx.setting::<u64>("interval-ms").unwrap_or(DEFAULT_INTERVAL_MS);
        let beats = Arc::clone(&self.beats);
        let events = Arc::clone(ctx.events());
        ctx.tick(
            Duration::from_millis(interval_ms),
            tick_fn(move || {
                let count = beats.fetch_add(1, Ordering::SeqCst) + 1;
                // Nobody waits on the handlers' results
                drop(events.publish(HEARTBEAT_EVENT, event_data(json!({ "count": count })), EventData::new()));
                async {}
            }),
        )?;
        log::info!("Heartbeat every {} ms", interval_ms);
        Ok(())
    }

    async fn stop(&self, ctx: &ModuleContext) -> KernelResult<()> {
        log::info!(
            "Heartbeat '{}' stopped after {} beat(s)",
            ctx.name(),
            self.beats.load(Ordering::SeqCst)
        );
        Ok(())
    }
}

/// Beat count reported by a `heartbeat_query` result
pub fn beat_count(result: &Value) -> Option<u64> {
    result.get("count").and_then(Value::as_u64)
}

#[cfg(test)]
mod tests;
