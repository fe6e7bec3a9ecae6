//! Test doubles for the lifecycle: a configurable kind and an engine wired
//! to in-memory ports.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use super::engine::{Engine, EngineSettings};
use super::kind::{StageContext, TaskKind};
use super::registry::TaskKindRegistry;
use crate::domain::{TaskId, TaskRecord, TaskStatus};
use crate::driver::ControlAction;
use crate::error::HookError;
use crate::impls::{InMemoryDriver, InMemoryTaskStore, LocalFileCache};
use crate::ports::{FixedClock, TaskStore, UlidGenerator};
use crate::signal::WorkSignal;

pub(crate) struct StubKind {
    name: &'static str,
    setup_ok: bool,
    save_ok: bool,
    accept_recovery: bool,
    accept_restart: bool,
    cascades: bool,
    setups: AtomicUsize,
    saves: AtomicUsize,
    controls: Mutex<Vec<ControlAction>>,
}

impl StubKind {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            setup_ok: true,
            save_ok: true,
            accept_recovery: false,
            accept_restart: false,
            cascades: true,
            setups: AtomicUsize::new(0),
            saves: AtomicUsize::new(0),
            controls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_setup(mut self) -> Self {
        self.setup_ok = false;
        self
    }

    pub fn failing_save(mut self) -> Self {
        self.save_ok = false;
        self
    }

    pub fn accepting_recovery(mut self) -> Self {
        self.accept_recovery = true;
        self
    }

    pub fn accepting_restart(mut self) -> Self {
        self.accept_restart = true;
        self
    }

    pub fn without_cascade(mut self) -> Self {
        self.cascades = false;
        self
    }

    pub fn setup_calls(&self) -> usize {
        self.setups.load(Ordering::SeqCst)
    }

    pub fn save_calls(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn controls(&self) -> Vec<ControlAction> {
        self.controls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskKind for StubKind {
    fn type_name(&self) -> &'static str {
        self.name
    }

    async fn setup(&self, _ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        self.setups.fetch_add(1, Ordering::SeqCst);
        Ok(self.setup_ok)
    }

    async fn cluster_commands(&self, _ctx: &mut StageContext<'_>) -> Result<Vec<String>, HookError> {
        Ok(vec![format!("echo {}", self.name)])
    }

    async fn save_results(&self, _ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(self.save_ok)
    }

    async fn recover_from_setup_failure(&self, _ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        Ok(self.accept_recovery)
    }

    async fn recover_from_cluster_failure(&self, _ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        Ok(self.accept_recovery)
    }

    async fn recover_from_post_processing_failure(&self, _ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        Ok(self.accept_recovery)
    }

    async fn restart_at_setup(&self, _ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        Ok(self.accept_restart)
    }

    async fn restart_at_cluster(&self, _ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        Ok(self.accept_restart)
    }

    async fn restart_at_post_processing(&self, _ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        Ok(self.accept_restart)
    }

    async fn after_control(&self, _ctx: &mut StageContext<'_>, action: ControlAction) -> Result<(), HookError> {
        self.controls.lock().unwrap().push(action);
        Ok(())
    }

    fn cascades_prerequisite_failures(&self) -> bool {
        self.cascades
    }
}

pub(crate) struct TestEngine {
    pub engine: Arc<Engine>,
    pub store: Arc<InMemoryTaskStore>,
    pub driver: Arc<InMemoryDriver>,
    pub clock: Arc<FixedClock>,
    pub dir: TempDir,
}

impl TestEngine {
    pub fn new(kinds: Vec<Arc<dyn TaskKind>>) -> Self {
        Self::with_settings(kinds, |_| {})
    }

    pub fn with_settings(kinds: Vec<Arc<dyn TaskKind>>, configure: impl FnOnce(&mut EngineSettings)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryTaskStore::new());
        let driver = Arc::new(InMemoryDriver::new());
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()));

        let mut registry = TaskKindRegistry::new();
        for kind in kinds {
            registry.register_arc(kind).unwrap();
        }
        let mut settings = EngineSettings {
            bourreau_id: "test-node".to_string(),
            work_root: dir.path().to_path_buf(),
            submission_grace: Duration::ZERO,
            ..EngineSettings::default()
        };
        configure(&mut settings);

        let engine = Engine::new(
            store.clone(),
            driver.clone(),
            Arc::new(LocalFileCache::new(dir.path().join(".cache"))),
            registry,
            clock.clone(),
            Arc::new(UlidGenerator::new(clock.clone())),
            WorkSignal::new(),
            settings,
        );
        Self {
            engine: Arc::new(engine),
            store,
            driver,
            clock,
            dir,
        }
    }

    pub async fn add(&self, task: TaskRecord) -> TaskRecord {
        self.engine.create_task(task).await.unwrap()
    }

    pub async fn load(&self, id: TaskId) -> TaskRecord {
        self.store.load(id).await.unwrap()
    }

    pub async fn status(&self, id: TaskId) -> TaskStatus {
        self.load(id).await.status
    }

    /// Advance every task needing attention once, in order.
    pub async fn sweep(&self) {
        let cache = self.engine.begin_sweep();
        let tasks = self
            .store
            .find_tasks_needing_attention(&self.engine.settings().bourreau_id)
            .await
            .unwrap();
        for task in tasks {
            self.engine.advance(task.id, &cache).await.unwrap();
        }
        self.engine.end_sweep();
    }

    /// Sweep repeatedly, letting every submitted job finish right away.
    pub async fn run_to_rest(&self) {
        for _ in 0..20 {
            self.driver.finish_all();
            self.sweep().await;
        }
    }
}
