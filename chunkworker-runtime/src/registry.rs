//! Executor factories known to this binary, keyed by module entry name

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::executor::{ChunkExecutor, ExecutorFactory, TypedExecutorFactory};
use crate::terrain::{TerrainExecutor, TERRAIN_ENTRY};

#[derive(Clone, Default)]
pub struct ModuleRegistry {
    factories: HashMap<String, Arc<dyn ExecutorFactory>>,
}

impl ModuleRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the modules bundled in this crate
    pub fn with_builtin_modules() -> Self {
        let mut registry = Self::new();
        registry.register_executor::<TerrainExecutor>(TERRAIN_ENTRY);
        registry
    }

    /// Register a factory under its own entry name, replacing any previous one
    pub fn register(&mut self, factory: Arc<dyn ExecutorFactory>) {
        self.factories.insert(factory.entry().to_string(), factory);
    }

    pub fn register_executor<E: ChunkExecutor>(&mut self, entry: impl Into<String>) {
        self.register(Arc::new(TypedExecutorFactory::<E>::new(entry)));
    }

    pub fn get(&self, entry: &str) -> Option<Arc<dyn ExecutorFactory>> {
        self.factories.get(entry).cloned()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.factories.contains_key(entry)
    }

    /// Registered entry names, sorted
    pub fn entries(&self) -> Vec<String> {
        let mut entries: Vec<String> = self.factories.keys().cloned().collect();
        entries.sort();
        entries
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("entries", &self.entries())
            .finish()
    }
}
