use std::path::Path;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::config::HostConfig;
use crate::event::{EventEngine, EventSystemError};
use crate::item::{ItemManager, MemoryItemManager};
use crate::kernel::component::KernelComponent;
use crate::kernel::constants;
use crate::kernel::error::{Error, KernelLifecyclePhase, Result};
use crate::module_system::{
    CodeLoader, CommandPackageManager, LoadOutcome, ModuleCatalog, ModuleManager, PackageManager,
};
use crate::tick::TickEngine;

/// One kernel instance: owns the engines and the module manager and drives
/// their lifecycle.
pub struct Application {
    config: HostConfig,
    events: Arc<EventEngine>,
    ticks: Arc<TickEngine>,
    items: Arc<dyn ItemManager>,
    modules: Arc<ModuleManager>,
    // Initialization order; shutdown walks it backwards
    components: Vec<Arc<dyn KernelComponent>>,
    initialized: bool,
    started: bool,
}

impl Application {
    /// Build a kernel with the in-memory item registry and the configured
    /// package manager command. Must be called from within a tokio runtime.
    pub fn new(config: HostConfig, catalog: ModuleCatalog) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| EventSystemError::NoRuntime)?;
        let packages = CommandPackageManager::new(config.module_manager.package_manager.clone());
        Ok(Self::with_collaborators(
            config,
            runtime,
            Arc::new(MemoryItemManager::new()),
            Arc::new(catalog),
            Arc::new(packages),
        ))
    }

    /// Build a kernel around explicit collaborators
    pub fn with_collaborators(
        config: HostConfig,
        runtime: Handle,
        items: Arc<dyn ItemManager>,
        loader: Arc<dyn CodeLoader>,
        packages: Arc<dyn PackageManager>,
    ) -> Self {
        log::info!("Initializing {} v{}", constants::APP_NAME, constants::APP_VERSION);

        let events = Arc::new(EventEngine::new(runtime.clone()));
        let ticks = Arc::new(TickEngine::new(runtime));
        let modules = Arc::new(ModuleManager::new(
            config.module_manager.clone(),
            Arc::clone(&events),
            Arc::clone(&ticks),
            Arc::clone(&items),
            loader,
            packages,
        ));
        let components: Vec<Arc<dyn KernelComponent>> = vec![
            events.clone() as Arc<dyn KernelComponent>,
            ticks.clone() as Arc<dyn KernelComponent>,
            modules.clone() as Arc<dyn KernelComponent>,
        ];

        Self {
            config,
            events,
            ticks,
            items,
            modules,
            components,
            initialized: false,
            started: false,
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn event_engine(&self) -> Arc<EventEngine> {
        Arc::clone(&self.events)
    }

    pub fn tick_engine(&self) -> Arc<TickEngine> {
        Arc::clone(&self.ticks)
    }

    pub fn item_manager(&self) -> Arc<dyn ItemManager> {
        Arc::clone(&self.items)
    }

    pub fn module_manager(&self) -> Arc<ModuleManager> {
        Arc::clone(&self.modules)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Initialize all components in order
    pub async fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Err(Error::KernelLifecycleError {
                phase: KernelLifecyclePhase::Initialize,
                component_name: None,
                message: "Application already initialized".to_string(),
                source: None,
            });
        }
        log::info!("Initializing components...");
        for component in &self.components {
            log::debug!("Initializing component: {}", component.name());
            component.initialize().await.map_err(|e| Error::KernelLifecycleError {
                phase: KernelLifecyclePhase::Initialize,
                component_name: Some(component.name().to_string()),
                message: "Component failed to initialize".to_string(),
                source: Some(Box::new(e)),
            })?;
        }
        self.initialized = true;
        Ok(())
    }

    /// Start all initialized components in order
    pub async fn start(&mut self) -> Result<()> {
        if !self.initialized {
            return Err(Error::KernelLifecycleError {
                phase: KernelLifecyclePhase::Start,
                component_name: None,
                message: "Application must be initialized before it is started".to_string(),
                source: None,
            });
        }
        log::info!("Starting components...");
        for component in &self.components {
            log::debug!("Starting component: {}", component.name());
            component.start().await.map_err(|e| Error::KernelLifecycleError {
                phase: KernelLifecyclePhase::Start,
                component_name: Some(component.name().to_string()),
                message: "Component failed to start".to_string(),
                source: Some(Box::new(e)),
            })?;
        }
        self.started = true;
        Ok(())
    }

    /// Load every module in the configured module folder
    pub async fn load_modules(&self) -> Result<Vec<LoadOutcome>> {
        self.load_modules_from(&self.config.module_manager.folder).await
    }

    pub async fn load_modules_from(&self, folder: &Path) -> Result<Vec<LoadOutcome>> {
        log::info!("Loading modules from {}", folder.display());
        Ok(self.modules.load_directory(folder).await?)
    }

    /// Stop all components in reverse order.
    ///
    /// Every component gets its `stop` call even if an earlier one failed; the
    /// first failure is returned.
    pub async fn shutdown(&mut self) -> Result<()> {
        log::info!("Shutting down components...");
        let mut first_error = None;
        for component in self.components.iter().rev() {
            log::debug!("Stopping component: {}", component.name());
            if let Err(e) = component.stop().await {
                log::error!("Error stopping component {}: {}", component.name(), e);
                first_error.get_or_insert(Error::KernelLifecycleError {
                    phase: KernelLifecyclePhase::Shutdown,
                    component_name: Some(component.name().to_string()),
                    message: "Component failed to stop".to_string(),
                    source: Some(Box::new(e)),
                });
            }
        }
        self.initialized = false;
        self.started = false;
        match first_error {
            Some(e) => Err(e),
            None => {
                log::info!("Component shutdown complete.");
                Ok(())
            }
        }
    }
}
