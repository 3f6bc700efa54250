use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::event::{event_data, handler_fn, sync_handler, BoxError, Event, WILDCARD};
use crate::kernel::error::Result as KernelResult;
use crate::module_system::{Module, ModuleCatalog, ModuleCode, ModuleContext};
use crate::tests::integration::common::*;
use crate::tick::tick_fn;

/// Answers `thermostat.query` with the last `temperature` event it saw and
/// publishes `thermostat.alive` from a tick.
#[derive(Debug, Default)]
struct Thermostat;

#[async_trait]
impl Module for Thermostat {
    async fn init(&self, ctx: &ModuleContext) -> KernelResult<()> {
        let last = Arc::new(std::sync::Mutex::new(Value::Null));

        let seen = Arc::clone(&last);
        ctx.register(
            "temperature",
            sync_handler(move |event: &Event| {
                *seen.lock().unwrap() = event.get("celsius").cloned().unwrap_or(Value::Null);
                Ok(Value::Null)
            }),
        );
        ctx.register(
            "thermostat.query",
            sync_handler(move |_| Ok(json!({"celsius": *last.lock().unwrap()}))),
        );

        let events = Arc::clone(ctx.events());
        ctx.tick(
            Duration::from_millis(20),
            tick_fn(move || {
                let events = Arc::clone(&events);
                async move {
                    events.publish("thermostat.alive", Default::default(), Default::default());
                }
            }),
        )?;
        Ok(())
    }
}

struct ThermostatCode;

impl ModuleCode for ThermostatCode {
    fn behavior(&self) -> Option<Box<dyn Module>> {
        Some(Box::new(Thermostat))
    }
}

fn thermostat_catalog(_: &Journal) -> ModuleCatalog {
    ModuleCatalog::new().with("thermostat", || Box::new(ThermostatCode) as Box<dyn ModuleCode>)
}

#[tokio::test]
async fn test_modules_communicate_through_events() {
    let h = Harness::new(thermostat_catalog);
    let path = write_file_module(h.root(), "thermostat");
    h.manager.load_file_module(&path, "thermostat").await.unwrap();

    for pending in h.events.publish("temperature", event_data(json!({"celsius": 21.5})), Default::default()) {
        pending.wait().await.unwrap();
    }
    let answers = h
        .events
        .gather("thermostat.query", Default::default(), Default::default())
        .await
        .unwrap();
    assert_eq!(answers, vec![json!({"celsius": 21.5})]);
}

#[tokio::test]
async fn test_gather_puts_wildcard_results_first() {
    let h = Harness::new(thermostat_catalog);
    let path = write_file_module(h.root(), "thermostat");
    h.manager.load_file_module(&path, "thermostat").await.unwrap();
    h.events.subscribe(
        WILDCARD,
        handler_fn(|_event: Arc<Event>| async { Ok::<_, BoxError>(json!("wildcard")) }),
    );

    let answers = h
        .events
        .gather("thermostat.query", Default::default(), Default::default())
        .await
        .unwrap();
    assert_eq!(answers, vec![json!("wildcard"), json!({"celsius": null})]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_foreign_thread_reaches_module_handler() {
    let h = Harness::new(thermostat_catalog);
    let path = write_file_module(h.root(), "thermostat");
    h.manager.load_file_module(&path, "thermostat").await.unwrap();

    let events = Arc::clone(&h.events);
    let published = std::thread::spawn(move || {
        events
            .publish_cross_thread("temperature", event_data(json!({"celsius": 19})), Default::default())
            .into_iter()
            .map(|pending| pending.blocking_wait())
            .collect::<Result<Vec<_>, _>>()
    })
    .join()
    .expect("publisher thread panicked");
    assert_eq!(published.unwrap().len(), 1);

    let answers = h
        .events
        .gather("thermostat.query", Default::default(), Default::default())
        .await
        .unwrap();
    assert_eq!(answers, vec![json!({"celsius": 19})]);
}

#[tokio::test]
async fn test_ticks_stop_when_module_unloads() {
    let h = Harness::new(thermostat_catalog);
    let mut probe = h.probe();
    let path = write_file_module(h.root(), "thermostat");
    h.manager.load_file_module(&path, "thermostat").await.unwrap();

    probe.next_of("thermostat.alive").await;
    assert_eq!(h.ticks.active(), 1);

    h.manager.unload("thermostat").await.unwrap();
    assert_eq!(h.ticks.active(), 0);
    assert_eq!(h.events.handler_count("thermostat.query"), 0);
    assert_eq!(h.events.handler_count("temperature"), 0);
}
