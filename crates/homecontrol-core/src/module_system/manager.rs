use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::ModuleManagerConfig;
use crate::event::{event_data, kernel_events, EventEngine};
use crate::item::ItemManager;
use crate::kernel::component::KernelComponent;
use crate::kernel::constants::{MODULE_ENTRY_FILE, MODULE_SPEC_FILE};
use crate::kernel::error::{Error as KernelError, Result as KernelResult};
use crate::module_system::context::ModuleContext;
use crate::module_system::descriptor::{
    LoadFailure, LoadOutcome, ModuleDescriptor, ModuleKind, ModuleState, ModuleSummary,
};
use crate::module_system::error::{LifecyclePhase, ModuleError};
use crate::module_system::loader::{CodeLoader, LoadRequest};
use crate::module_system::packages::PackageManager;
use crate::module_system::requirement::{InstalledPackages, Requirement};
use crate::module_system::spec::ModuleSpec;
use crate::module_system::traits::{compose, Module, ModuleCode, SpecSource};
use crate::tick::TickEngine;

struct LoadedModule {
    descriptor: ModuleDescriptor,
    context: Arc<ModuleContext>,
}

#[derive(Default)]
struct ModuleTable {
    entries: HashMap<String, LoadedModule>,
    /// Names in load order
    order: Vec<String>,
}

/// Failure inside a load, before name and path are attached
struct Failed {
    stage: ModuleState,
    error: ModuleError,
}

/// Lifecycle state of a load that has not reached composition yet
struct Progress<'a> {
    name: &'a str,
    state: ModuleState,
}

impl<'a> Progress<'a> {
    fn new(name: &'a str) -> Self {
        Self {
            name,
            state: ModuleState::Discovered,
        }
    }

    fn advance(&mut self, next: ModuleState) {
        log::trace!("Module '{}': {} -> {}", self.name, self.state, next);
        self.state = next;
    }

    /// Record `error` against the state reached so far and end the load
    fn fail(&mut self, error: ModuleError) -> Failed {
        let stage = self.state;
        self.advance(ModuleState::LoadFailed);
        Failed { stage, error }
    }
}

/// Discovers, loads and unloads modules.
///
/// Loads and unloads are serialized. The module table and the installed
/// package snapshot are owned here; the snapshot is taken once on first use
/// (normally [`KernelComponent::initialize`]) and re-listed after every
/// successful dependency install or an explicit
/// [`refresh_installed_packages`](Self::refresh_installed_packages).
pub struct ModuleManager {
    config: ModuleManagerConfig,
    events: Arc<EventEngine>,
    ticks: Arc<TickEngine>,
    items: Arc<dyn ItemManager>,
    loader: Arc<dyn CodeLoader>,
    packages: Arc<dyn PackageManager>,
    operations: tokio::sync::Mutex<()>,
    modules: RwLock<ModuleTable>,
    installed: RwLock<Option<InstalledPackages>>,
    search_path: Mutex<Vec<PathBuf>>,
}

impl fmt::Debug for ModuleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleManager")
            .field("folder", &self.config.folder)
            .field("loaded", &self.module_names())
            .field("items", &self.items)
            .field("loader", &self.loader)
            .field("packages", &self.packages)
            .finish_non_exhaustive()
    }
}

impl ModuleManager {
    pub fn new(
        config: ModuleManagerConfig,
        events: Arc<EventEngine>,
        ticks: Arc<TickEngine>,
        items: Arc<dyn ItemManager>,
        loader: Arc<dyn CodeLoader>,
        packages: Arc<dyn PackageManager>,
    ) -> Self {
        let search_path = vec![config.folder.clone()];
        Self {
            config,
            events,
            ticks,
            items,
            loader,
            packages,
            operations: tokio::sync::Mutex::new(()),
            modules: RwLock::new(ModuleTable::default()),
            installed: RwLock::new(None),
            search_path: Mutex::new(search_path),
        }
    }

    pub fn config(&self) -> &ModuleManagerConfig {
        &self.config
    }

    fn table(&self) -> RwLockReadGuard<'_, ModuleTable> {
        self.modules.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn table_mut(&self) -> RwLockWriteGuard<'_, ModuleTable> {
        self.modules.write().unwrap_or_else(PoisonError::into_inner)
    }

    //--------------------------------------------------
    // Queries
    //--------------------------------------------------

    pub fn is_loaded(&self, name: &str) -> bool {
        self.table().entries.contains_key(name)
    }

    /// Loaded module names in load order
    pub fn module_names(&self) -> Vec<String> {
        self.table().order.clone()
    }

    pub fn descriptor(&self, name: &str) -> Option<ModuleSummary> {
        self.table().entries.get(name).map(|m| m.descriptor.summary())
    }

    pub fn len(&self) -> usize {
        self.table().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().entries.is_empty()
    }

    /// Directories code is currently resolved from
    pub fn search_path(&self) -> Vec<PathBuf> {
        self.search_path.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    //--------------------------------------------------
    // Installed package snapshot
    //--------------------------------------------------

    /// Re-list installed packages, replacing the snapshot
    pub async fn refresh_installed_packages(&self) -> Result<usize, ModuleError> {
        let listed = self.packages.list_installed().await?;
        let count = listed.len();
        *self.installed.write().unwrap_or_else(PoisonError::into_inner) = Some(listed);
        log::debug!("Package snapshot holds {} package(s)", count);
        Ok(count)
    }

    async fn installed_snapshot(&self) -> InstalledPackages {
        let cached = self.installed.read().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(snapshot) = cached {
            return snapshot;
        }
        if let Err(e) = self.refresh_installed_packages().await {
            log::warn!("Could not list installed packages, treating none as installed: {}", e);
            *self.installed.write().unwrap_or_else(PoisonError::into_inner) = Some(InstalledPackages::new());
        }
        self.installed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_default()
    }

    //--------------------------------------------------
    // Loading
    //--------------------------------------------------

    /// Load every module found directly inside `path`.
    ///
    /// Directories (symlinks included) are folder modules and files with the
    /// configured source extension are file modules. Hidden entries, ignored
    /// directories and blacklisted names are skipped. A failing candidate,
    /// including one that cannot be inspected, is reported and never stops
    /// the scan; only an unreadable `path` is an error.
    pub async fn load_directory(&self, path: &Path) -> Result<Vec<LoadOutcome>, ModuleError> {
        let mut reader = tokio::fs::read_dir(path).await.map_err(|e| ModuleError::io(path, e))?;
        let mut candidates = Vec::new();
        let mut outcomes = Vec::new();
        loop {
            match reader.next_entry().await {
                Ok(Some(entry)) => {
                    let mod_path = entry.path();
                    let is_dir = tokio::fs::metadata(&mod_path).await.map(|metadata| metadata.is_dir());
                    candidates.push((entry.file_name(), mod_path, is_dir));
                }
                Ok(None) => break,
                Err(e) => {
                    let name = path.display().to_string();
                    let failed = Progress::new(&name).fail(ModuleError::io(path, e));
                    outcomes.push(self.finish(&name, Some(path), Err(failed)));
                }
            }
        }
        candidates.sort_by(|a, b| a.0.cmp(&b.0));

        for (node, mod_path, is_dir) in candidates {
            let Some(node) = node.to_str() else {
                log::warn!("Skipping non UTF-8 entry {}", mod_path.display());
                continue;
            };
            if node.starts_with('.') {
                continue;
            }

            let is_dir = match is_dir {
                Ok(is_dir) => is_dir,
                Err(e) => {
                    let name = self.candidate_name(node, false).unwrap_or(node);
                    if !self.config.is_blacklisted(name) {
                        let failed = Progress::new(name).fail(ModuleError::io(&mod_path, e));
                        outcomes.push(self.finish(name, Some(&mod_path), Err(failed)));
                    }
                    continue;
                }
            };
            let Some(name) = self.candidate_name(node, is_dir) else {
                log::trace!("Ignoring {}", mod_path.display());
                continue;
            };
            if self.config.is_blacklisted(name) {
                log::info!("Skipping blacklisted module '{}'", name);
                continue;
            }

            let outcome = if is_dir {
                self.load_folder_module(&mod_path, name).await
            } else {
                self.load_file_module(&mod_path, name).await
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Module name for directory entry `node`, or `None` when it is no module
    fn candidate_name<'n>(&self, node: &'n str, is_dir: bool) -> Option<&'n str> {
        if is_dir {
            return (!self.config.is_ignored_dir(node)).then_some(node);
        }
        let node_path = Path::new(node);
        let extension = node_path.extension().and_then(|ext| ext.to_str())?;
        if extension != self.config.source_extension {
            return None;
        }
        node_path.file_stem().and_then(|stem| stem.to_str())
    }

    /// Load a single-file module
    pub async fn load_file_module(&self, path: &Path, name: &str) -> LoadOutcome {
        let _ops = self.operations.lock().await;
        let result = self.load_file_inner(path, name).await;
        self.finish(name, Some(path), result)
    }

    /// Load a folder module, installing missing requirements first
    pub async fn load_folder_module(&self, path: &Path, name: &str) -> LoadOutcome {
        let _ops = self.operations.lock().await;
        let result = self.load_folder_inner(path, name).await;
        self.finish(name, Some(path), result)
    }

    /// Load code compiled into the host, without a filesystem location
    pub async fn load_builtin(&self, name: &str, code: Box<dyn ModuleCode>) -> LoadOutcome {
        let _ops = self.operations.lock().await;
        let result = self.load_builtin_inner(name, code).await;
        self.finish(name, None, result)
    }

    fn ensure_not_loaded(&self, name: &str) -> Result<(), ModuleError> {
        if self.is_loaded(name) {
            return Err(ModuleError::AlreadyLoaded { name: name.to_string() });
        }
        Ok(())
    }

    async fn load_file_inner(&self, path: &Path, name: &str) -> Result<ModuleSummary, Failed> {
        let mut progress = Progress::new(name);
        self.ensure_not_loaded(name).map_err(|e| progress.fail(e))?;
        if !is_file(path).await {
            return Err(progress.fail(ModuleError::StructureInvalid {
                name: name.to_string(),
                path: path.to_path_buf(),
                missing: "module file".to_string(),
            }));
        }

        let code = self.load_code(name, path).map_err(|e| progress.fail(e))?;
        progress.advance(ModuleState::CodeLoaded);
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let spec = resolve_spec(name, code.spec_source(), base)
            .await
            .map_err(|e| progress.fail(e))?;
        self.instantiate(progress, Some(path.to_path_buf()), ModuleKind::File, spec, code.behavior())
            .await
    }

    async fn load_folder_inner(&self, path: &Path, name: &str) -> Result<ModuleSummary, Failed> {
        let mut progress = Progress::new(name);
        self.ensure_not_loaded(name).map_err(|e| progress.fail(e))?;
        let entry_point = path.join(MODULE_ENTRY_FILE);
        let spec_path = path.join(MODULE_SPEC_FILE);
        let missing = if !is_dir(path).await {
            Some("module directory")
        } else if !is_file(&entry_point).await {
            Some(MODULE_ENTRY_FILE)
        } else if !is_file(&spec_path).await {
            Some(MODULE_SPEC_FILE)
        } else {
            None
        };
        if let Some(missing) = missing {
            return Err(progress.fail(ModuleError::StructureInvalid {
                name: name.to_string(),
                path: path.to_path_buf(),
                missing: missing.to_string(),
            }));
        }

        let spec = ModuleSpec::load(name, &spec_path).await.map_err(|e| progress.fail(e))?;
        if !spec.pip_requirements.is_empty() {
            progress.advance(ModuleState::DependenciesResolving);
            self.resolve_requirements(name, &spec)
                .await
                .map_err(|e| progress.fail(e))?;
        }

        self.push_search_path(path);
        let code = self.load_code(name, &entry_point);
        self.pop_search_path(path);
        let code = code.map_err(|e| progress.fail(e))?;
        progress.advance(ModuleState::CodeLoaded);

        // The folder's spec file wins over anything the code declares
        self.instantiate(progress, Some(path.to_path_buf()), ModuleKind::Folder, spec, code.behavior())
            .await
    }

    async fn load_builtin_inner(&self, name: &str, code: Box<dyn ModuleCode>) -> Result<ModuleSummary, Failed> {
        let mut progress = Progress::new(name);
        self.ensure_not_loaded(name).map_err(|e| progress.fail(e))?;
        progress.advance(ModuleState::CodeLoaded);
        let spec = resolve_spec(name, code.spec_source(), Path::new("."))
            .await
            .map_err(|e| progress.fail(e))?;
        self.instantiate(progress, None, ModuleKind::Builtin, spec, code.behavior()).await
    }

    fn load_code(&self, name: &str, entry_point: &Path) -> Result<Box<dyn ModuleCode>, ModuleError> {
        let search_path = self.search_path();
        self.loader.load(&LoadRequest {
            name,
            entry_point,
            search_path: &search_path,
        })
    }

    fn push_search_path(&self, path: &Path) {
        self.search_path
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path.to_path_buf());
    }

    fn pop_search_path(&self, path: &Path) {
        let mut search_path = self.search_path.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(idx) = search_path.iter().rposition(|p| p == path) {
            search_path.remove(idx);
        }
    }

    /// Install whatever requirements the snapshot does not satisfy, in one go
    async fn resolve_requirements(&self, name: &str, spec: &ModuleSpec) -> Result<(), ModuleError> {
        let requirements = spec.requirements().map_err(|source| ModuleError::RequirementInvalid {
            name: name.to_string(),
            source,
        })?;
        if requirements.is_empty() {
            return Ok(());
        }

        let installed = self.installed_snapshot().await;
        let mut unsatisfied: Vec<Requirement> = Vec::new();
        for requirement in requirements {
            if !requirement.is_satisfied_by(&installed) && !unsatisfied.contains(&requirement) {
                unsatisfied.push(requirement);
            }
        }
        if unsatisfied.is_empty() {
            log::debug!("All requirements of module '{}' are satisfied", name);
            return Ok(());
        }

        let args: Vec<String> = unsatisfied.iter().map(Requirement::install_arg).collect();
        log::info!("Installing requirements for module '{}': {}", name, args.join(", "));
        let status = self.packages.install(&unsatisfied).await?;
        if status != 0 {
            return Err(ModuleError::DependencyInstallFailed {
                name: name.to_string(),
                requirements: args,
                status,
            });
        }
        if let Err(e) = self.refresh_installed_packages().await {
            log::warn!("Could not refresh package snapshot after install: {}", e);
        }
        Ok(())
    }

    /// Compose, hand items over, run `init` and `start`, then record the module
    async fn instantiate(
        &self,
        mut progress: Progress<'_>,
        path: Option<PathBuf>,
        kind: ModuleKind,
        spec: ModuleSpec,
        behavior: Option<Box<dyn Module>>,
    ) -> Result<ModuleSummary, Failed> {
        let name = progress.name;
        let module = compose(behavior);
        progress.advance(ModuleState::Composed);
        let mut descriptor = ModuleDescriptor::new(name, path, kind, spec.clone(), Arc::clone(&module));
        let context = Arc::new(ModuleContext::new(
            name,
            spec,
            Arc::clone(&self.events),
            Arc::clone(&self.ticks),
        ));

        if let Err(source) = self.items.add_from_module(&mut descriptor).await {
            let error = ModuleError::ItemsRejected {
                name: name.to_string(),
                source,
            };
            return Err(self.rollback(&mut descriptor, &context, error).await);
        }

        if let Err(e) = module.init(&context).await {
            let error = lifecycle_failed(name, LifecyclePhase::Init, e);
            return Err(self.rollback(&mut descriptor, &context, error).await);
        }
        descriptor.transition(ModuleState::Initialized);

        if let Err(e) = module.start(&context).await {
            if let Err(stop_err) = module.stop(&context).await {
                log::warn!("Module '{}' also failed to stop after a failed start: {}", name, stop_err);
            }
            let error = lifecycle_failed(name, LifecyclePhase::Start, e);
            return Err(self.rollback(&mut descriptor, &context, error).await);
        }
        descriptor.transition(ModuleState::Running);

        let summary = descriptor.summary();
        let mut table = self.table_mut();
        table.order.push(name.to_string());
        table
            .entries
            .insert(name.to_string(), LoadedModule { descriptor, context });
        Ok(summary)
    }

    /// Undo a partial load: take the items back and drop what the context holds
    async fn rollback(
        &self,
        descriptor: &mut ModuleDescriptor,
        context: &ModuleContext,
        error: ModuleError,
    ) -> Failed {
        for identifier in &descriptor.items {
            if let Err(e) = self.items.remove_item(identifier).await {
                log::warn!(
                    "Could not remove item '{}' of failed module '{}': {}",
                    identifier,
                    descriptor.name,
                    e
                );
            }
        }
        context.revoke();
        let stage = descriptor.state;
        descriptor.transition(ModuleState::LoadFailed);
        Failed { stage, error }
    }

    /// Report a finished load through the log and the event engine
    fn finish(&self, name: &str, path: Option<&Path>, result: Result<ModuleSummary, Failed>) -> LoadOutcome {
        match result {
            Ok(summary) => {
                log::info!("Loaded module '{}'", name);
                let module = serde_json::to_value(&summary).unwrap_or_default();
                self.events.publish(
                    kernel_events::MODULE_LOADED,
                    Default::default(),
                    event_data(json!({ "module": module })),
                );
                Ok(summary)
            }
            Err(Failed { stage, error }) => {
                match path {
                    Some(path) => log::warn!("Module could not be loaded: {} at {}: {}", name, path.display(), error),
                    None => log::warn!("Module could not be loaded: {}: {}", name, error),
                }
                self.events.publish(
                    kernel_events::MODULE_NOT_LOADED,
                    Default::default(),
                    event_data(json!({
                        "exception": Value::String(error.to_string()),
                        "name": name,
                    })),
                );
                Err(LoadFailure {
                    name: name.to_string(),
                    path: path.map(Path::to_path_buf),
                    stage,
                    error,
                })
            }
        }
    }

    //--------------------------------------------------
    // Unloading
    //--------------------------------------------------

    /// Remove a module's items, run its `stop` hook, then forget it.
    ///
    /// If an item cannot be removed the module stays loaded (still running,
    /// holding the items that could not be removed) and `stop` is not called.
    /// If `stop` fails the module stays in the table in the `Stopping` state.
    pub async fn unload(&self, name: &str) -> Result<(), ModuleError> {
        let _ops = self.operations.lock().await;
        self.unload_locked(name).await
    }

    async fn unload_locked(&self, name: &str) -> Result<(), ModuleError> {
        let (items, module, context) = {
            let mut table = self.table_mut();
            let entry = table
                .entries
                .get_mut(name)
                .ok_or_else(|| ModuleError::NotFound { name: name.to_string() })?;
            if entry.descriptor.state != ModuleState::Stopping {
                entry.descriptor.transition(ModuleState::Stopping);
            }
            (
                entry.descriptor.items.clone(),
                Arc::clone(&entry.descriptor.module),
                Arc::clone(&entry.context),
            )
        };
        log::info!("Unloading module '{}'", name);

        let mut failures = Vec::new();
        let mut remaining = Vec::new();
        for identifier in items {
            if let Err(e) = self.items.remove_item(&identifier).await {
                failures.push(format!("{}: {}", identifier, e));
                remaining.push(identifier);
            }
        }

        {
            let mut table = self.table_mut();
            if let Some(entry) = table.entries.get_mut(name) {
                entry.descriptor.items = remaining;
                if !failures.is_empty() {
                    entry.descriptor.transition(ModuleState::Running);
                }
            }
        }
        if !failures.is_empty() {
            return Err(ModuleError::ItemRemovalFailed {
                name: name.to_string(),
                failures,
            });
        }

        if let Err(e) = module.stop(&context).await {
            return Err(lifecycle_failed(name, LifecyclePhase::Stop, e));
        }

        let (subscriptions, ticks) = context.revoke();
        if subscriptions + ticks > 0 {
            log::debug!(
                "Revoked {} subscription(s) and {} tick(s) left by module '{}'",
                subscriptions,
                ticks,
                name
            );
        }

        let mut table = self.table_mut();
        if let Some(mut entry) = table.entries.remove(name) {
            entry.descriptor.transition(ModuleState::Unloaded);
        }
        table.order.retain(|n| n != name);
        log::info!("Unloaded module '{}'", name);
        Ok(())
    }

    /// Unload every module in reverse load order, continuing past failures
    pub async fn unload_all(&self) -> Result<(), ModuleError> {
        let _ops = self.operations.lock().await;
        let mut failed = Vec::new();
        for name in self.module_names().into_iter().rev() {
            if let Err(e) = self.unload_locked(&name).await {
                log::warn!("Failed to unload module '{}': {}", name, e);
                failed.push(name);
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(ModuleError::ShutdownIncomplete { failed })
        }
    }
}

fn lifecycle_failed(name: &str, phase: LifecyclePhase, source: KernelError) -> ModuleError {
    ModuleError::LifecycleFailed {
        name: name.to_string(),
        phase,
        source: Box::new(source),
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|metadata| metadata.is_file())
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|metadata| metadata.is_dir())
}

async fn resolve_spec(name: &str, source: SpecSource, base: &Path) -> Result<ModuleSpec, ModuleError> {
    match source {
        SpecSource::None => Ok(ModuleSpec::default()),
        SpecSource::Inline(spec) => Ok(spec),
        SpecSource::Text(text) => ModuleSpec::from_yaml(&text).map_err(|e| ModuleError::SpecInvalid {
            name: name.to_string(),
            message: e.to_string(),
        }),
        SpecSource::File(path) => {
            let path = if path.is_absolute() { path } else { base.join(path) };
            ModuleSpec::load(name, &path).await
        }
    }
}

#[async_trait]
impl KernelComponent for ModuleManager {
    fn name(&self) -> &'static str {
        "ModuleManager"
    }

    async fn initialize(&self) -> KernelResult<()> {
        let snapshot = self.installed_snapshot().await;
        log::debug!("Module manager ready, {} package(s) installed", snapshot.len());
        Ok(())
    }

    async fn start(&self) -> KernelResult<()> {
        Ok(())
    }

    async fn stop(&self) -> KernelResult<()> {
        self.unload_all().await.map_err(KernelError::from)
    }
}
