use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::item::{Item, ItemError, ItemManager};
use crate::module_system::ModuleDescriptor;

/// Item built directly from an item spec (`{id, type, cfg}`)
#[derive(Debug, Clone, PartialEq)]
pub struct SpecItem {
    identifier: String,
    item_type: String,
    module: String,
    cfg: Value,
}

impl SpecItem {
    pub fn cfg(&self) -> &Value {
        &self.cfg
    }
}

impl Item for SpecItem {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn item_type(&self) -> &str {
        &self.item_type
    }

    fn module(&self) -> &str {
        &self.module
    }
}

/// In-process item registry.
///
/// Adding a module's items is all-or-nothing: if any identifier clashes,
/// nothing from that module is registered.
#[derive(Debug, Default)]
pub struct MemoryItemManager {
    items: RwLock<HashMap<String, Arc<SpecItem>>>,
}

impl MemoryItemManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, identifier: &str) -> Option<Arc<SpecItem>> {
        self.items.read().await.get(identifier).cloned()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// Identifiers contributed by `module`, sorted
    pub async fn items_of(&self, module: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .items
            .read()
            .await
            .values()
            .filter(|item| item.module == module)
            .map(|item| item.identifier.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl ItemManager for MemoryItemManager {
    async fn add_from_module(&self, module: &mut ModuleDescriptor) -> Result<(), ItemError> {
        let mut items = self.items.write().await;

        let mut seen = HashSet::new();
        for spec in &module.item_specs {
            if let Some(existing) = items.get(&spec.id) {
                return Err(ItemError::DuplicateIdentifier {
                    identifier: spec.id.clone(),
                    owner: existing.module.clone(),
                });
            }
            if !seen.insert(spec.id.as_str()) {
                return Err(ItemError::DuplicateIdentifier {
                    identifier: spec.id.clone(),
                    owner: module.name.clone(),
                });
            }
        }

        for spec in &module.item_specs {
            let item = SpecItem {
                identifier: spec.id.clone(),
                item_type: spec.item_type.clone(),
                module: module.name.clone(),
                cfg: spec.cfg.clone(),
            };
            items.insert(spec.id.clone(), Arc::new(item));
            module.items.push(spec.id.clone());
        }
        log::debug!("Added {} item(s) from module '{}'", module.item_specs.len(), module.name);
        Ok(())
    }

    async fn remove_item(&self, identifier: &str) -> Result<(), ItemError> {
        match self.items.write().await.remove(identifier) {
            Some(_) => Ok(()),
            None => Err(ItemError::NotFound {
                identifier: identifier.to_string(),
            }),
        }
    }
}
