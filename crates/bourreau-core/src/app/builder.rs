//! EngineBuilder - Engine の構築とワイヤリング
//!
//! # Fail-fast
//! `expect_task_types` で指定した task type が `build` 時点で未登録ならエラー。

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::driver::{LocalDriver, SchedulerDriver};
use crate::impls::{InMemoryTaskStore, LocalFileCache, ShellTask};
use crate::lifecycle::{Engine, EngineSettings, RegistryError, TaskKind, TaskKindRegistry};
use crate::parallelizer::Parallelizer;
use crate::ports::{Clock, FileCache, IdGenerator, SystemClock, TaskStore, UlidGenerator};
use crate::signal::WorkSignal;

/// EngineBuilder は Engine を組み立てる
///
/// # 使用例
/// ```ignore
/// let engine = EngineBuilder::from_config(&config)
///     .register(MyKind)?
///     .with_builtin_kinds()?
///     .expect_task_types(&["my_kind", "parallelizer"])
///     .build()?;
/// ```
pub struct EngineBuilder {
    registry: TaskKindRegistry,
    expected_types: Option<Vec<String>>,
    store: Option<Arc<dyn TaskStore>>,
    driver: Option<Arc<dyn SchedulerDriver>>,
    files: Option<Arc<dyn FileCache>>,
    file_cache_root: Option<PathBuf>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    settings: EngineSettings,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing task types: {0:?}; these were expected but not registered")]
    MissingTaskTypes(Vec<String>),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            registry: TaskKindRegistry::new(),
            expected_types: None,
            store: None,
            driver: None,
            files: None,
            file_cache_root: None,
            clock: None,
            ids: None,
            settings: EngineSettings::default(),
        }
    }

    /// `config` から settings, driver, file cache の場所を取る
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut builder = Self::new().settings(config.settings()).driver(config.driver.build());
        builder.file_cache_root = Some(config.file_cache_root());
        builder
    }

    pub fn register<K: TaskKind + 'static>(mut self, kind: K) -> Result<Self, BuildError> {
        self.registry.register(kind)?;
        Ok(self)
    }

    pub fn register_arc(mut self, kind: Arc<dyn TaskKind>) -> Result<Self, BuildError> {
        self.registry.register_arc(kind)?;
        Ok(self)
    }

    /// `parallelizer` and `shell`.
    pub fn with_builtin_kinds(self) -> Result<Self, BuildError> {
        self.register(Parallelizer)?.register(ShellTask)
    }

    pub fn expect_task_types(mut self, task_types: &[&str]) -> Self {
        self.expected_types = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn driver(mut self, driver: Arc<dyn SchedulerDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn file_cache(mut self, files: Arc<dyn FileCache>) -> Self {
        self.files = Some(files);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// 未指定のものはデフォルトを使う
    /// - store: InMemoryTaskStore
    /// - driver: LocalDriver
    /// - files: LocalFileCache
    /// - clock: SystemClock
    pub fn build(self) -> Result<Arc<Engine>, BuildError> {
        if let Some(expected) = &self.expected_types {
            let registered = self.registry.registered_types();
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !registered.contains(t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing));
            }
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let store = self.store.unwrap_or_else(|| Arc::new(InMemoryTaskStore::new()));
        let driver = self.driver.unwrap_or_else(|| Arc::new(LocalDriver::new()));
        let files = match self.files {
            Some(files) => files,
            None => {
                let root = self
                    .file_cache_root
                    .unwrap_or_else(|| self.settings.work_root.join(".cache"));
                Arc::new(LocalFileCache::new(root))
            }
        };

        tracing::debug!(
            bourreau_id = %self.settings.bourreau_id,
            driver = driver.name(),
            task_types = ?self.registry.registered_types(),
            "engine built"
        );
        Ok(Arc::new(Engine::new(
            store,
            driver,
            files,
            self.registry,
            clock,
            ids,
            WorkSignal::new(),
            self.settings,
        )))
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
