//! Core logging module.
//!
//! Installs a global `tracing` subscriber writing to stderr and bridges the
//! `log` facade the kernel logs through into it. Optionally logs every event
//! published on the engine.
//!
//! Settings live under the `logging` key of the module spec:
//!
//! ```yaml
//! logging:
//!   level: info          # EnvFilter directive; RUST_LOG wins when set
//!   format: compact      # full | compact | json
//!   log-events: false
//! ```
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

use homecontrol_core::event::{sync_handler, WILDCARD};
use homecontrol_core::kernel::constants::DEFAULT_LOG_LEVEL;
use homecontrol_core::kernel::error::{Error as KernelError, Result as KernelResult};
use homecontrol_core::module_system::{Module, ModuleCode, ModuleContext, ModuleSpec, SpecSource};

pub const MODULE_NAME: &str = "core-logging";

/// Spec key holding [`LoggingSettings`]
pub const SETTINGS_KEY: &str = "logging";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
    /// Log every published event at debug level
    pub log_events: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            format: LogFormat::default(),
            log_events: false,
        }
    }
}

/// Install the global subscriber and the `log` bridge.
///
/// Returns `Ok(false)` when another subscriber was installed first; that is
/// not an error, the existing one keeps receiving everything.
pub fn install_subscriber(settings: &LoggingSettings) -> KernelResult<bool> {
    let configured = EnvFilter::try_new(&settings.level)
        .map_err(|e| KernelError::Other(format!("Invalid log level '{}': {}", settings.level, e)))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or(configured);

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match settings.format {
        LogFormat::Full => {
            tracing::subscriber::set_global_default(registry.with(fmt::layer().with_writer(std::io::stderr)))
        }
        LogFormat::Compact => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().compact().with_writer(std::io::stderr)),
        ),
        LogFormat::Json => {
            tracing::subscriber::set_global_default(registry.with(fmt::layer().json().with_writer(std::io::stderr)))
        }
    };
    if installed.is_err() {
        tracing::debug!("A global tracing subscriber is already installed, keeping it");
        return Ok(false);
    }

    if let Err(e) = tracing_log::LogTracer::init() {
        tracing::debug!("log facade already bridged: {}", e);
    }
    Ok(true)
}

/// Code of the core logging module, registered with the module manager as a
/// builtin.
#[derive(Debug, Clone, Default)]
pub struct CoreLogging {
    settings: LoggingSettings,
}

impl CoreLogging {
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            settings: LoggingSettings {
                level: level.into(),
                ..LoggingSettings::default()
            },
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.settings.format = format;
        self
    }

    pub fn with_event_logging(mut self, enabled: bool) -> Self {
        self.settings.log_events = enabled;
        self
    }

    pub fn settings(&self) -> &LoggingSettings {
        &self.settings
    }
}

impl ModuleCode for CoreLogging {
    fn behavior(&self) -> Option<Box<dyn Module>> {
        Some(Box::new(LoggingModule))
    }

    fn spec_source(&self) -> SpecSource {
        let mut spec = ModuleSpec::default();
        spec.meta.name = Some("Core Logging".to_string());
        spec.meta.description = Some("Sets up application logging".to_string());
        spec.extra.insert(
            SETTINGS_KEY.to_string(),
            json!({
                "level": self.settings.level,
                "format": self.settings.format,
                "log-events": self.settings.log_events,
            }),
        );
        SpecSource::Inline(spec)
    }
}

struct LoggingModule;

#[async_trait]
impl Module for LoggingModule {
    async fn init(&self, ctx: &ModuleContext) -> KernelResult<()> {
        let settings: LoggingSettings = ctx.setting(SETTINGS_KEY).unwrap_or_default();
        if install_subscriber(&settings)? {
            log::info!("Logging initialized at level '{}'", settings.level);
        }

        if settings.log_events {
            ctx.register(
                WILDCARD,
                sync_handler(|event| {
                    tracing::debug!(target: "homecontrol::events", event_type = event.event_type(), "{}", event);
                    Ok(Value::Null)
                }),
            );
        }
        Ok(())
    }

    async fn stop(&self, _ctx: &ModuleContext) -> KernelResult<()> {
        log::info!("Shutting down core logging");
        Ok(())
    }
}
