//! PollLoop - sweep ループ
//!
//! # フロー
//! 1. タイマー、または `WorkSignal` の bump で起床
//! 2. 対応が必要なタスクを store から取得
//! 3. 各タスクを `advance`（同時実行数は permits で制限）

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::lifecycle::{Advance, Engine};

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    /// Upper bound on concurrent `advance` calls within one sweep.
    pub max_parallel_advances: usize,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_parallel_advances: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub moved: usize,
    pub busy: usize,
    pub failed: usize,
}

/// PollLoop のハンドル
///
/// # 停止
/// - `request_shutdown`: 新しい sweep を止める（実行中の sweep は最後まで走る）
/// - `shutdown_and_join`: さらにループタスクの終了を待つ
pub struct PollLoop {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl PollLoop {
    pub fn spawn(engine: Arc<Engine>, settings: PollSettings) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            poll_loop(engine, settings, shutdown_rx).await;
        });
        Self { shutdown_tx, join }
    }

    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            error!(error = %e, "poll loop task failed");
        }
    }
}

async fn poll_loop(engine: Arc<Engine>, settings: PollSettings, mut shutdown_rx: watch::Receiver<bool>) {
    let permits = Arc::new(Semaphore::new(settings.max_parallel_advances.max(1)));
    let mut waiter = engine.signal().subscribe();
    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        bourreau_id = %engine.settings().bourreau_id,
        interval_ms = settings.interval.as_millis() as u64,
        "poll loop started"
    );
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
            _ = waiter.changed() => {}
        }

        match sweep(&engine, &permits).await {
            Ok(report) if report.moved > 0 || report.failed > 0 => {
                debug!(
                    examined = report.examined,
                    moved = report.moved,
                    busy = report.busy,
                    failed = report.failed,
                    "sweep done"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "sweep failed"),
        }
    }
    info!("poll loop stopped");
}

/// One pass over every task this node owns that needs attention. Advances
/// run concurrently, bounded by `permits`, and share one job snapshot.
pub async fn sweep(engine: &Arc<Engine>, permits: &Arc<Semaphore>) -> Result<SweepReport, EngineError> {
    let tasks = engine
        .store()
        .find_tasks_needing_attention(&engine.settings().bourreau_id)
        .await?;
    let mut report = SweepReport {
        examined: tasks.len(),
        ..SweepReport::default()
    };
    if tasks.is_empty() {
        return Ok(report);
    }

    let cache = engine.begin_sweep();
    let mut joins = JoinSet::new();
    for task in tasks {
        let Ok(permit) = Arc::clone(permits).acquire_owned().await else {
            break;
        };
        let engine = Arc::clone(engine);
        let cache = Arc::clone(&cache);
        joins.spawn(async move {
            let _permit = permit;
            (task.id, engine.advance(task.id, &cache).await)
        });
    }

    while let Some(joined) = joins.join_next().await {
        match joined {
            Ok((_, Ok(Advance::Moved { .. }))) => report.moved += 1,
            Ok((_, Ok(Advance::Busy))) => report.busy += 1,
            Ok((_, Ok(Advance::Idle(_)))) => {}
            Ok((task_id, Err(e))) => {
                report.failed += 1;
                warn!(%task_id, error = %e, "advance failed");
            }
            Err(e) => {
                report.failed += 1;
                error!(error = %e, "advance task panicked");
            }
        }
    }
    engine.end_sweep();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskStatus;
    use crate::lifecycle::testing::{StubKind, TestEngine};

    #[tokio::test]
    async fn sweep_reports_moves() {
        let t = TestEngine::new(vec![Arc::new(StubKind::new("stub"))]);
        let first = t.add(t.engine.new_task("stub", Default::default())).await;
        let second = t.add(t.engine.new_task("stub", Default::default())).await;
        let permits = Arc::new(Semaphore::new(2));

        let report = sweep(&t.engine, &permits).await.unwrap();
        assert_eq!(report.examined, 2);
        assert_eq!(report.moved, 2);
        assert_eq!(t.status(first.id).await, TaskStatus::Queued);
        assert_eq!(t.status(second.id).await, TaskStatus::Queued);

        let report = sweep(&t.engine, &permits).await.unwrap();
        assert_eq!(report.moved, 0);
        assert_eq!(t.driver.bulk_queries(), 1);
    }

    #[tokio::test]
    async fn empty_sweep_skips_the_driver() {
        let t = TestEngine::new(vec![Arc::new(StubKind::new("stub"))]);
        let report = sweep(&t.engine, &Arc::new(Semaphore::new(1))).await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert_eq!(t.driver.bulk_queries(), 0);
    }

    #[tokio::test]
    async fn loop_completes_tasks_and_shuts_down() {
        let t = TestEngine::new(vec![Arc::new(StubKind::new("stub"))]);
        let task = t.add(t.engine.new_task("stub", Default::default())).await;
        let poll = PollLoop::spawn(
            Arc::clone(&t.engine),
            PollSettings {
                interval: Duration::from_millis(10),
                max_parallel_advances: 4,
            },
        );

        let mut status = TaskStatus::New;
        for _ in 0..200 {
            t.driver.finish_all();
            status = t.status(task.id).await;
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        poll.shutdown_and_join().await;
        assert_eq!(status, TaskStatus::Completed);
    }
}
