//! TaskKindRegistry: task_type -> TaskKind.

use std::collections::HashMap;
use std::sync::Arc;

use super::kind::TaskKind;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("task kind '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("task kind '{0}' is not registered")]
    NotRegistered(String),
}

#[derive(Default, Clone)]
pub struct TaskKindRegistry {
    kinds: HashMap<String, Arc<dyn TaskKind>>,
}

impl TaskKindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<K: TaskKind + 'static>(&mut self, kind: K) -> Result<(), RegistryError> {
        self.register_arc(Arc::new(kind))
    }

    pub fn register_arc(&mut self, kind: Arc<dyn TaskKind>) -> Result<(), RegistryError> {
        let name = kind.type_name().to_string();
        if self.kinds.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        self.kinds.insert(name, kind);
        Ok(())
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskKind>> {
        self.kinds.get(task_type).cloned()
    }

    pub fn require(&self, task_type: &str) -> Result<Arc<dyn TaskKind>, RegistryError> {
        self.get(task_type)
            .ok_or_else(|| RegistryError::NotRegistered(task_type.to_string()))
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.kinds.keys().cloned().collect();
        types.sort();
        types
    }
}
